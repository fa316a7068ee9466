#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tower::ServiceExt;

use review_scheduler::core::EventBus;
use review_scheduler::history::{InMemoryHistory, ReviewHistory};
use review_scheduler::memory::{EstimatorConfig, IntervalRecommender, OnlineEstimator, RecommenderConfig};
use review_scheduler::service::ReviewService;
use review_scheduler::store::{DecayParameterStore, InMemoryParameterStore};

pub async fn create_test_app() -> Router {
    review_scheduler::create_app()
        .await
        .expect("test app should build")
}

pub struct Fixture {
    pub history: Arc<InMemoryHistory>,
    pub store: Arc<InMemoryParameterStore>,
    pub recommender: Arc<IntervalRecommender>,
    pub bus: Arc<EventBus>,
    pub service: Arc<ReviewService>,
}

pub fn fixture(default_lambda: f64) -> Fixture {
    let history = Arc::new(InMemoryHistory::new());
    let store = Arc::new(InMemoryParameterStore::new(default_lambda));
    let store_dyn: Arc<dyn DecayParameterStore> = store.clone();
    let history_dyn: Arc<dyn ReviewHistory> = history.clone();
    let recommender = Arc::new(IntervalRecommender::new(
        RecommenderConfig::default(),
        Arc::clone(&store_dyn),
    ));
    let bus = Arc::new(EventBus::new());
    let service = Arc::new(ReviewService::new(
        history_dyn,
        store_dyn,
        OnlineEstimator::new(EstimatorConfig {
            default_lambda,
            ..Default::default()
        }),
        Arc::clone(&recommender),
        Arc::clone(&bus),
    ));
    Fixture {
        history,
        store,
        recommender,
        bus,
        service,
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
