#![allow(unused)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, LevelFilter};
use tokio::task::JoinHandle;

use crate::api::*;

mod api;
mod chain;
mod client;
mod config;
mod error;
mod flow;
mod ledger;

/// Local stand-in for the remote schedule/prediction service. Serves the
/// production wire shapes from fixture data so the client and the flow
/// can be exercised without the real backend.
struct Stub {
    schedule: Vec<Event>,
    predictions: HashMap<EventId, Prediction>,
    predict_hits: AtomicUsize,
}
impl Stub {
    fn new(schedule: Vec<Event>, predictions: HashMap<EventId, Prediction>) -> Self {
        Self {
            schedule,
            predictions,
            predict_hits: AtomicUsize::new(0),
        }
    }
}

#[debug_handler]
async fn get_schedule(State(stub): State<Arc<Stub>>) -> Json<ScheduleResponse> {
    debug!("Serving schedule with {} games", stub.schedule.len());
    Json(ScheduleResponse {
        success: true,
        schedule: stub.schedule.clone(),
    })
}
async fn get_prediction(
    State(stub): State<Arc<Stub>>,
    Path(id): Path<EventId>,
) -> Json<PredictResponse> {
    stub.predict_hits.fetch_add(1, Ordering::SeqCst);
    match stub.predictions.get(&id) {
        Some(prediction) => {
            debug!("Serving prediction for game {}", id);
            Json(PredictResponse {
                success: true,
                prediction: Some(prediction.clone()),
                error: None,
            })
        }
        None => Json(PredictResponse {
            success: false,
            prediction: None,
            error: Some(format!("no prediction available for game {}", id)),
        }),
    }
}

async fn run_server(port: Option<u16>, stub: Arc<Stub>) -> (u16, JoinHandle<()>) {
    let app = Router::new()
        .route("/schedule", get(get_schedule))
        .route("/predict/:id", get(get_prediction))
        .with_state(stub);

    let addr = "127.0.0.1:".to_string() + port.unwrap_or(0).to_string().as_str();
    let server = axum::Server::bind(&addr.parse().unwrap()).serve(app.into_make_service());
    let port = server.local_addr().port();
    debug!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        server.await.unwrap();
    });
    (port, handle)
}

fn sample_schedule() -> Vec<Event> {
    vec![
        Event {
            id: 101,
            home_team: "Kansas City Chiefs".to_string(),
            away_team: "Baltimore Ravens".to_string(),
            date: "2024-09-08".to_string(),
            time: "13:00".to_string(),
            stadium: "Arrowhead Stadium".to_string(),
            city: "Kansas City".to_string(),
            status: "Not Started".to_string(),
        },
        Event {
            id: 102,
            home_team: "Philadelphia Eagles".to_string(),
            away_team: "Green Bay Packers".to_string(),
            date: "2024-09-10".to_string(),
            time: "20:00".to_string(),
            stadium: "Lincoln Financial Field".to_string(),
            city: "Philadelphia".to_string(),
            status: "Not Started".to_string(),
        },
        Event {
            id: 103,
            home_team: "Buffalo Bills".to_string(),
            away_team: "New York Jets".to_string(),
            date: "2024-09-09".to_string(),
            time: "20:15".to_string(),
            stadium: "Highmark Stadium".to_string(),
            city: "Orchard Park".to_string(),
            status: "Not Started".to_string(),
        },
    ]
}
fn sample_prediction(event: &Event) -> Prediction {
    let mut advantages = HashMap::new();
    advantages.insert(
        event.home_team.clone(),
        vec![
            "QB passer rating edge".to_string(),
            "Home field".to_string(),
        ],
    );
    advantages.insert(
        event.away_team.clone(),
        vec!["Defense third-down stops".to_string()],
    );
    let mut confidence_scores = HashMap::new();
    confidence_scores.insert(event.home_team.clone(), 62.5);
    confidence_scores.insert(event.away_team.clone(), 37.5);
    Prediction {
        matchup: format!("{} (Home) vs {} (Away)", event.home_team, event.away_team),
        date: Some(event.date.clone()),
        statistical_analysis: StatisticalAnalysis { advantages },
        confidence_scores,
        betting_recommendations: vec![
            BetRecommendation {
                kind: "Spread".to_string(),
                bet: format!("{} -3.5", event.home_team),
                odds: Some(1.91),
                confidence: Some(65.0),
                explanation: "Statistical edge at home against a travelling defense".to_string(),
            },
            BetRecommendation {
                kind: "Key Number Alert".to_string(),
                bet: "Consider line movement".to_string(),
                odds: None,
                confidence: None,
                explanation: "Spread sits on a key number".to_string(),
            },
        ],
    }
}
fn sample_stub() -> Arc<Stub> {
    let schedule = sample_schedule();
    let predictions = schedule
        .iter()
        .map(|event| (event.id, sample_prediction(event)))
        .collect();
    Arc::new(Stub::new(schedule, predictions))
}

#[derive(Parser)]
struct Args {
    #[arg(short, long, default_value_t = 8081)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    Builder::default()
        .filter_level(LevelFilter::Debug)
        .write_style(WriteStyle::Always)
        .init();
    let cli = Args::parse();
    let (_port, handle) = run_server(Some(cli.port), sample_stub()).await;
    handle.await;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use alloy_primitives::{Address, U256};
    use tokio::sync::RwLock;

    use super::*;
    use crate::client::PredictionApi;
    use crate::error::FlowError;
    use crate::flow::{Flow, FlowConfig, FlowState, Session};
    use crate::ledger::{AccessLedger, MemoryLedger};

    const OWNER: Address = Address::repeat_byte(0xaa);
    const USER: Address = Address::repeat_byte(0xbb);
    const PRICE: u64 = 100;

    fn test_config() -> FlowConfig {
        FlowConfig {
            poll_interval: Duration::from_millis(10),
            settlement_timeout: Duration::from_secs(5),
            fallback_price: U256::from(PRICE),
        }
    }

    async fn setup() -> (Arc<Stub>, Flow, MemoryLedger, Arc<RwLock<Session>>) {
        let stub = sample_stub();
        let (port, _) = run_server(None, stub.clone()).await;
        let api = PredictionApi::new("http://127.0.0.1:".to_string() + port.to_string().as_str());
        let ledger = MemoryLedger::new(OWNER, U256::from(PRICE));
        ledger.fund(USER, U256::from(PRICE * 10));
        let flow = Flow::new(
            api,
            Arc::new(ledger.clone()) as Arc<dyn AccessLedger + Send + Sync>,
            test_config(),
        );
        let session = Arc::new(RwLock::new(Session::new()));
        session.write().await.connect(USER);
        (stub, flow, ledger, session)
    }

    #[tokio::test]
    async fn schedule_is_served_in_kickoff_order() {
        let stub = sample_stub();
        let (port, _) = run_server(None, stub).await;
        let api = PredictionApi::new("http://127.0.0.1:".to_string() + port.to_string().as_str());
        let schedule = api.fetch_schedule().await.unwrap();
        assert_eq!(
            schedule.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![101, 103, 102]
        );
    }

    #[tokio::test]
    async fn granted_access_skips_payment() {
        let (stub, flow, ledger, session) = setup().await;
        ledger.grant(USER, 101);
        let event = sample_schedule().remove(0);
        let prediction = flow.get_prediction(&session, &event).await.unwrap();
        assert!(prediction.matchup.contains("Kansas City Chiefs"));
        assert_eq!(ledger.purchase_count(), 0);
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 1);
        let s = session.read().await;
        assert_eq!(s.state(), FlowState::Done);
        assert!(s.error().is_none());
    }

    #[tokio::test]
    async fn purchase_settles_then_prediction_is_fetched() {
        let (stub, flow, ledger, session) = setup().await;
        ledger.set_confirmations(3);
        let event = sample_schedule().remove(0);
        let prediction = flow.get_prediction(&session, &event).await.unwrap();
        assert_eq!(ledger.purchase_count(), 1);
        assert!(ledger.can_access(USER, event.id).await.unwrap());
        assert_eq!(ledger.wallet_balance(USER), U256::from(PRICE * 9));
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 1);
        assert_eq!(session.read().await.prediction(), Some(&prediction));
    }

    #[tokio::test]
    async fn cancelled_payment_fetches_nothing() {
        let (stub, flow, ledger, session) = setup().await;
        ledger.reject_next_purchase();
        let event = sample_schedule().remove(0);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::PaymentCancelled));
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 0);
        let s = session.read().await;
        assert_eq!(s.state(), FlowState::Failed);
        assert!(s.error().unwrap().contains("cancelled"));
        assert!(s.prediction().is_none());
    }

    #[tokio::test]
    async fn underfunded_wallet_surfaces_insufficient_funds() {
        let (stub, flow, ledger, session) = setup().await;
        ledger.set_price(U256::from(PRICE * 100));
        let event = sample_schedule().remove(0);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::InsufficientFunds));
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_price_below_ledger_price_is_rejected_by_the_contract() {
        let (stub, flow, ledger, session) = setup().await;
        // With the advertised price unreadable the flow falls back to its
        // configured amount, which the contract then rejects as below
        // price. The user sees an insufficient-funds message either way.
        ledger.set_price(U256::from(PRICE * 2));
        ledger.fail_price_reads();
        let event = sample_schedule().remove(0);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::InsufficientFunds));
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn settled_but_ungranted_payment_is_a_hard_stop() {
        let (stub, flow, ledger, session) = setup().await;
        ledger.deny_grant_on_settlement();
        let event = sample_schedule().remove(0);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::PaymentVerificationFailed));
        assert_eq!(ledger.purchase_count(), 1);
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 0);
        assert_eq!(session.read().await.state(), FlowState::Failed);
    }

    #[tokio::test]
    async fn settlement_has_a_ceiling() {
        let (stub, flow, ledger, session) = setup().await;
        ledger.set_confirmations(u32::MAX);
        let flow = Flow::new(
            PredictionApi::new("http://127.0.0.1:0".to_string()),
            Arc::new(ledger.clone()) as Arc<dyn AccessLedger + Send + Sync>,
            FlowConfig {
                poll_interval: Duration::from_millis(10),
                settlement_timeout: Duration::from_millis(50),
                fallback_price: U256::from(PRICE),
            },
        );
        let event = sample_schedule().remove(0);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::SettlementTimeout(_)));
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnected_session_is_rejected_immediately() {
        let (stub, flow, ledger, session) = setup().await;
        session.write().await.disconnect();
        let event = sample_schedule().remove(0);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::NotConnected));
        assert_eq!(ledger.purchase_count(), 0);
        assert_eq!(stub.predict_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_network_switches_once_then_fails() {
        let (_, flow, ledger, session) = setup().await;
        ledger.grant(USER, 101);
        ledger.set_network_mismatch(5, true);
        let event = sample_schedule().remove(0);
        flow.get_prediction(&session, &event).await.unwrap();

        ledger.set_network_mismatch(5, false);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        assert!(matches!(err, FlowError::WrongNetwork { .. }));
    }

    #[tokio::test]
    async fn stale_settlement_poll_never_resolves_into_new_selection() {
        let (stub, flow, ledger, session) = setup().await;
        // First selection's payment never settles; the poll stays up.
        ledger.set_confirmations(u32::MAX);
        let flow = Arc::new(flow);
        let slow = {
            let flow = flow.clone();
            let session = session.clone();
            let event = sample_schedule().remove(0);
            tokio::spawn(async move { flow.get_prediction(&session, &event).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Re-invoking for another event supersedes the stale poll.
        ledger.grant(USER, 103);
        let event = sample_schedule().remove(2);
        let prediction = flow.get_prediction(&session, &event).await.unwrap();

        let stale = slow.await.unwrap().unwrap_err();
        assert!(matches!(stale, FlowError::Superseded));
        let s = session.read().await;
        assert_eq!(s.selected(), Some(103));
        assert_eq!(s.state(), FlowState::Done);
        assert_eq!(s.prediction(), Some(&prediction));
        assert!(s.error().is_none());
    }

    #[tokio::test]
    async fn missing_prediction_is_surfaced_with_the_server_message() {
        let (stub, flow, ledger, session) = setup().await;
        let event = Event {
            id: 999,
            ..sample_schedule().remove(0)
        };
        ledger.grant(USER, 999);
        let err = flow.get_prediction(&session, &event).await.unwrap_err();
        match err {
            FlowError::PredictionUnavailable(message) => {
                assert!(message.contains("no prediction available for game 999"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn owner_withdraws_accumulated_fees() {
        let (_, flow, ledger, session) = setup().await;
        let event = sample_schedule().remove(0);
        flow.get_prediction(&session, &event).await.unwrap();

        // Only the owner may sweep.
        let err = flow.withdraw(&session).await.unwrap_err();
        assert!(matches!(err, FlowError::Withdrawal(_)));

        let owner_session = Arc::new(RwLock::new(Session::new()));
        owner_session.write().await.connect(OWNER);
        let amount = flow.withdraw(&owner_session).await.unwrap();
        assert_eq!(amount, U256::from(PRICE));
    }
}
