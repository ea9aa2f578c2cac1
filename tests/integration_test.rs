//! Integration tests for the API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use nft_shopping_store::api::create_router;
use nft_shopping_store::api::handlers::{BrandItemCount, OrderAccepted};
use nft_shopping_store::app::AppState;
use nft_shopping_store::domain::{
    Brand, CreateBrandRequest, CreateCreationRequest, Creation, ErrorResponse, HealthResponse,
    HealthStatus, Item, OrderItemRequest, PaginatedResponse, RegisterUserRequest, Trade,
    TradeInCreationRequest, UpdateCreationRequest, User,
};
use nft_shopping_store::events::{DeliverItemMessage, ORDER_ITEM, OrderItemMessage};
use nft_shopping_store::test_utils::{MockPublisher, MockRepos};

fn router_for(mocks: &MockRepos) -> Router {
    let state = Arc::new(AppState::new(Arc::new(mocks.service())));
    create_router(state, Duration::from_secs(5))
}

fn post_json<T: serde::Serialize>(uri: &str, payload: &T) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(payload).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body_bytes).unwrap()
}

fn seed_market(mocks: &MockRepos) -> (User, User, Creation) {
    let buyer = User::new("0xBUYER");
    let seller = User::new("0xSELLER");
    let creation = Creation::new("Genesis", "brand-1", 100, 10, "0xC0FFEE");
    mocks.users.insert(buyer.clone());
    mocks.users.insert(seller.clone());
    mocks.creations.insert(creation.clone());
    (buyer, seller, creation)
}

#[tokio::test]
async fn test_register_user_success() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let response = router
        .oneshot(post_json("/api/users/register", &RegisterUserRequest::new("0xABC")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let user: User = json_body(response).await;
    assert_eq!(user.account, "0xABC");
    assert_eq!(mocks.users.get_all_users().len(), 1);
}

#[tokio::test]
async fn test_register_duplicate_returns_business_code() {
    let mocks = MockRepos::new();
    mocks.users.insert(User::new("0xABC"));
    let router = router_for(&mocks);

    let response = router
        .oneshot(post_json("/api/users/register", &RegisterUserRequest::new("0xABC")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.code, Some(202));
}

#[tokio::test]
async fn test_register_validation_error() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let response = router
        .oneshot(post_json("/api/users/register", &RegisterUserRequest::new("")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(mocks.sessions.stats().opens, 0);
}

#[tokio::test]
async fn test_register_malformed_json() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let request = Request::builder()
        .method("POST")
        .uri("/api/users/register")
        .header("Content-Type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_get_user_not_found() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let response = router.oneshot(get("/api/users/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trade_in_creation_success() {
    let mocks = MockRepos::new();
    let (buyer, seller, creation) = seed_market(&mocks);
    let router = router_for(&mocks);

    let request = TradeInCreationRequest {
        creation_id: creation.id.clone(),
        buyer: buyer.id,
        seller: seller.id,
        amount: 3,
    };
    let response = router.oneshot(post_json("/api/trades", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let trade: Trade = json_body(response).await;
    assert_eq!(trade.price, 300);
    assert_eq!(mocks.creations.stock_of(&creation.id), Some(7));
}

#[tokio::test]
async fn test_trade_insufficient_stock_rolls_back_trade() {
    let mocks = MockRepos::new();
    let (buyer, seller, creation) = seed_market(&mocks);
    let router = router_for(&mocks);

    let request = TradeInCreationRequest {
        creation_id: creation.id.clone(),
        buyer: buyer.id,
        seller: seller.id,
        amount: 11,
    };
    let response = router.oneshot(post_json("/api/trades", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.code, Some(302));
    assert!(mocks.trades.get_all_trades().is_empty());
    assert_eq!(mocks.creations.stock_of(&creation.id), Some(10));
}

#[tokio::test]
async fn test_trade_unknown_buyer() {
    let mocks = MockRepos::new();
    let (_, seller, creation) = seed_market(&mocks);
    let router = router_for(&mocks);

    let request = TradeInCreationRequest {
        creation_id: creation.id,
        buyer: "nobody".to_string(),
        seller: seller.id,
        amount: 1,
    };
    let response = router.oneshot(post_json("/api/trades", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.code, Some(201));
}

#[tokio::test]
async fn test_list_trades_with_filter_and_paging() {
    let mocks = MockRepos::new();
    let (buyer, seller, creation) = seed_market(&mocks);
    let service = mocks.service();
    for amount in 1..=3 {
        service
            .trade_in_creation(&TradeInCreationRequest {
                creation_id: creation.id.clone(),
                buyer: buyer.id.clone(),
                seller: seller.id.clone(),
                amount,
            })
            .await
            .unwrap();
    }
    let router = router_for(&mocks);

    let response = router
        .clone()
        .oneshot(get("/api/trades?min_price=200&per_page=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page: PaginatedResponse<Trade> = json_body(response).await;
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total_pages, 2);

    let response = router
        .oneshot(get(&format!("/api/trades?seller={}", buyer.id)))
        .await
        .unwrap();
    let page: PaginatedResponse<Trade> = json_body(response).await;
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_get_trade_round_trip() {
    let mocks = MockRepos::new();
    let (buyer, seller, creation) = seed_market(&mocks);
    let trade = mocks
        .service()
        .trade_in_creation(&TradeInCreationRequest {
            creation_id: creation.id,
            buyer: buyer.id,
            seller: seller.id,
            amount: 1,
        })
        .await
        .unwrap();
    let router = router_for(&mocks);

    let response = router.oneshot(get(&format!("/api/trades/{}", trade.id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let fetched: Trade = json_body(response).await;
    assert_eq!(fetched.id, trade.id);
}

#[tokio::test]
async fn test_order_item_publishes_event() {
    let mocks = MockRepos::new();
    let (_, _, creation) = seed_market(&mocks);
    let router = router_for(&mocks);

    let request = OrderItemRequest {
        creation_id: creation.id.clone(),
        amount: 2,
    };
    let response = router.oneshot(post_json("/api/items/order", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted: OrderAccepted = json_body(response).await;
    let published = mocks.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, ORDER_ITEM);
    assert_eq!(published[0].1.uuid, accepted.event_id);

    let message: OrderItemMessage = serde_json::from_slice(&published[0].1.payload).unwrap();
    assert_eq!(message.creation_id, creation.id);
    assert_eq!(message.contract, "0xC0FFEE");
    assert_eq!(message.amount, 2);
}

#[tokio::test]
async fn test_order_item_broker_down() {
    let mut mocks = MockRepos::new();
    mocks.publisher = Arc::new(MockPublisher::failing("broker unreachable"));
    let (_, _, creation) = seed_market(&mocks);
    let router = router_for(&mocks);

    let request = OrderItemRequest {
        creation_id: creation.id,
        amount: 1,
    };
    let response = router.oneshot(post_json("/api/items/order", &request)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_get_item_and_owner_listing() {
    let mocks = MockRepos::new();
    mocks.items.insert(Item {
        contract: "0xC0FFEE".to_string(),
        token: "7".to_string(),
        creation_id: "c-1".to_string(),
        owner: Some("alice".to_string()),
        brand_owner: "brand-1".to_string(),
    });
    let router = router_for(&mocks);

    let response = router.clone().oneshot(get("/api/items/0xC0FFEE/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let item: Item = json_body(response).await;
    assert_eq!(item.token, "7");

    let response = router.clone().oneshot(get("/api/users/alice/items")).await.unwrap();
    let items: Vec<Item> = json_body(response).await;
    assert_eq!(items.len(), 1);

    let response = router.oneshot(get("/api/items/0xC0FFEE/8")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_brand_creation_and_delivery_over_http() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let creation_request = CreateCreationRequest {
        name: "Genesis".to_string(),
        brand_id: "Acme".to_string(),
        description: None,
        price: 100,
        amount: 10,
        contract_address: "0xC0FFEE".to_string(),
    };
    let response = router
        .clone()
        .oneshot(post_json("/api/creations", &creation_request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error.code, Some(401));

    let response = router
        .clone()
        .oneshot(post_json("/api/brands", &CreateBrandRequest::new("Acme")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let brand: Brand = json_body(response).await;
    assert_eq!(brand.id, "Acme");

    let response = router
        .clone()
        .oneshot(post_json("/api/creations", &creation_request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let creation: Creation = json_body(response).await;

    let response = router
        .clone()
        .oneshot(get("/api/creations?brand_id=Acme&max_price=500"))
        .await
        .unwrap();
    let listed: PaginatedResponse<Creation> = json_body(response).await;
    assert_eq!(listed.total, 1);
    assert_eq!(listed.items[0].id, creation.id);

    for token in ["1", "2"] {
        let delivery = DeliverItemMessage {
            creation_id: creation.id.clone(),
            contract: creation.contract_address.clone(),
            token: token.to_string(),
        };
        let response = router
            .clone()
            .oneshot(post_json("/api/items/deliver", &delivery))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = router.clone().oneshot(get("/api/items?brand_owner=Acme")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let items: PaginatedResponse<Item> = json_body(response).await;
    assert_eq!(items.total, 2);
    assert!(items.items.iter().all(|i| i.brand_owner == "Acme"));

    let response = router.clone().oneshot(get("/api/brands/Acme/items/count")).await.unwrap();
    let count: BrandItemCount = json_body(response).await;
    assert_eq!(count.amount, 2);

    let response = router.oneshot(get("/api/brands/Globex/items/count")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_and_delete_creation_over_http() {
    let mocks = MockRepos::new();
    let (_, _, creation) = seed_market(&mocks);
    let router = router_for(&mocks);

    let update = UpdateCreationRequest {
        name: Some("Exodus".to_string()),
        description: None,
    };
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/api/creations/{}", creation.id))
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(&update).unwrap()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Creation = json_body(response).await;
    assert_eq!(updated.name, "Exodus");

    let delete = |id: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/creations/{id}"))
            .body(Body::empty())
            .unwrap()
    };
    let response = router.clone().oneshot(delete(&creation.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router.clone().oneshot(delete(&creation.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.oneshot(get(&format!("/api/creations/{}", creation.id))).await.unwrap();
    let error: ErrorResponse = json_body(response).await;
    assert_eq!(error.error.code, Some(301));
}

#[tokio::test]
async fn test_health_check() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = json_body(response).await;
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_health_check_degraded_when_broker_down() {
    let mocks = MockRepos::new();
    mocks.publisher.set_healthy(false);
    let router = router_for(&mocks);

    let response = router.clone().oneshot(get("/health")).await.unwrap();
    let health: HealthResponse = json_body(response).await;
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.broker, HealthStatus::Degraded);

    let response = router.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_unhealthy_when_database_down() {
    let mocks = MockRepos::new();
    mocks.sessions.set_healthy(false);
    let router = router_for(&mocks);

    let response = router.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_liveness() {
    let mocks = MockRepos::new();
    let router = router_for(&mocks);

    let response = router.oneshot(get("/health/live")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
