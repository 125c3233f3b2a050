//! Stopping agent runs.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use agentrun_core::keys::parse_active_run_key;
use agentrun_core::{LifecycleSignal, RunKeys, RunStatus};
use agentrun_relay::{ControlPublisher, ResponseLog};

use crate::run_store::{RunStatusUpdate, RunStore};
use crate::state::AppState;

/// What [`stop_agent_run`] managed to do. Steps fail independently.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub run_id: String,
    pub final_status: RunStatus,
    pub responses: usize,
    pub db_updated: bool,
    pub global_signal_sent: bool,
    pub instances_signalled: Vec<String>,
    pub list_expired: bool,
}

/// Mark a run stopped (or failed, with `error_message`) and signal everyone
/// serving or executing it.
///
/// Each step logs its failure and moves on.
pub async fn stop_agent_run(state: &AppState, run_id: &str, error_message: Option<&str>) -> StopReport {
    info!(run_id = %run_id, "stopping agent run");
    let keys = RunKeys::new(run_id);
    let list_key = keys.response_list();

    let responses = match read_responses(state, &list_key).await {
        Ok(responses) => {
            info!(run_id = %run_id, count = responses.len(), "fetched responses for stop");
            responses
        }
        Err(e) => {
            error!(run_id = %run_id, error = %e, "failed to fetch responses during stop");
            Vec::new()
        }
    };

    let update = RunStatusUpdate::stopped(error_message.map(str::to_string), responses);
    let mut report = StopReport {
        run_id: run_id.to_string(),
        final_status: update.status,
        responses: update.responses.len(),
        db_updated: false,
        global_signal_sent: false,
        instances_signalled: Vec::new(),
        list_expired: false,
    };

    match &state.runs {
        Some(runs) => match runs.update_run_status(run_id, &update).await {
            Ok(true) => report.db_updated = true,
            Ok(false) => warn!(run_id = %run_id, "no run row to update"),
            Err(e) => error!(run_id = %run_id, error = %e, "failed to update run status"),
        },
        None => warn!(run_id = %run_id, "run store not configured, status not recorded"),
    }

    let stop = LifecycleSignal::Stop.as_str();
    let global = keys.control_channel();
    match state.control.publish(&global, stop).await {
        Ok(()) => {
            debug!(channel = %global, "published STOP");
            report.global_signal_sent = true;
        }
        Err(e) => error!(channel = %global, error = %e, "failed to publish STOP"),
    }

    match state.control.keys(&keys.active_run_pattern()).await {
        Ok(active) => {
            debug!(run_id = %run_id, count = active.len(), "active instances found");
            for key in active {
                let Some((instance, _)) = parse_active_run_key(&key) else {
                    warn!(key = %key, "unexpected active run key format");
                    continue;
                };
                let channel = keys.instance_control_channel(instance);
                match state.control.publish(&channel, stop).await {
                    Ok(()) => report.instances_signalled.push(instance.to_string()),
                    Err(e) => warn!(channel = %channel, error = %e, "failed to publish STOP"),
                }
            }
        }
        Err(e) => error!(run_id = %run_id, error = %e, "failed to find active instances"),
    }

    // Runs even when the instance lookup failed, so the list still expires.
    let ttl = state.config.redis.response_list_ttl();
    match state.control.expire(&list_key, ttl).await {
        Ok(()) => {
            debug!(key = %list_key, ttl_secs = ttl.as_secs(), "response list expiry set");
            report.list_expired = true;
        }
        Err(e) => warn!(key = %list_key, error = %e, "failed to set response list expiry"),
    }

    info!(run_id = %run_id, status = %report.final_status, "stop initiated");
    report
}

async fn read_responses(state: &AppState, list_key: &str) -> anyhow::Result<Vec<Value>> {
    let raw = state.log.range(list_key, 0, -1).await?;
    raw.iter()
        .map(|r| serde_json::from_str(r).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use agentrun_core::keys::active_run_key;
    use agentrun_core::Config;
    use agentrun_relay::MemoryBroker;

    use super::*;
    use crate::run_store::MemoryRunStore;

    fn state(broker: &MemoryBroker, store: Option<&MemoryRunStore>) -> AppState {
        let mut config = Config::for_profile("");
        config.redis.response_list_ttl_secs = 120;
        AppState::new(
            config,
            Arc::new(broker.clone()),
            store.map(|s| Arc::new(s.clone()) as Arc<dyn RunStore>),
        )
    }

    #[tokio::test]
    async fn test_stop_signals_global_and_instance_channels() {
        let broker = MemoryBroker::new();
        let store = MemoryRunStore::new();
        store.add_run("run-1", "thread-1", "running");
        broker.push("agent_run:run-1:responses", &json!({"type": "text"}));
        broker.set_key(&active_run_key("inst-a", "run-1"), "running");
        broker.set_key(&active_run_key("inst-b", "run-1"), "running");
        broker.set_key(&active_run_key("inst-c", "run-2"), "running");
        broker.set_key("active_run:a:b:run-1", "running");

        let report = stop_agent_run(&state(&broker, Some(&store)), "run-1", None).await;

        assert_eq!(report.final_status, RunStatus::Stopped);
        assert_eq!(report.responses, 1);
        assert!(report.db_updated);
        assert!(report.global_signal_sent);
        assert_eq!(report.instances_signalled, vec!["inst-a", "inst-b"]);
        assert!(report.list_expired);

        let published = broker.published();
        assert_eq!(
            published,
            vec![
                ("agent_run:run-1:control".to_string(), "STOP".to_string()),
                ("agent_run:run-1:control:inst-a".to_string(), "STOP".to_string()),
                ("agent_run:run-1:control:inst-b".to_string(), "STOP".to_string()),
            ]
        );
        assert_eq!(
            broker.expiry("agent_run:run-1:responses"),
            Some(Duration::from_secs(120))
        );

        let run = store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, "stopped");
        let (_, update) = &store.updates()[0];
        assert_eq!(update.responses, vec![json!({"type": "text"})]);
    }

    #[tokio::test]
    async fn test_stop_with_error_marks_failed() {
        let broker = MemoryBroker::new();
        let store = MemoryRunStore::new();
        store.add_run("run-1", "thread-1", "running");

        let report = stop_agent_run(&state(&broker, Some(&store)), "run-1", Some("worker died")).await;
        assert_eq!(report.final_status, RunStatus::Failed);

        let run = store.get_run("run-1").await.unwrap().unwrap();
        assert_eq!(run.status, "failed");
        assert_eq!(run.error.as_deref(), Some("worker died"));
    }

    #[tokio::test]
    async fn test_stop_continues_past_failures() {
        let broker = MemoryBroker::new();
        broker.fail_reads(true);
        let store = MemoryRunStore::new();
        store.add_run("run-1", "thread-1", "running");
        store.set_unavailable(true);

        let report = stop_agent_run(&state(&broker, Some(&store)), "run-1", None).await;
        assert_eq!(report.responses, 0);
        assert!(!report.db_updated);
        assert!(report.global_signal_sent);
        assert!(report.list_expired);
    }

    #[tokio::test]
    async fn test_stop_expires_list_when_instance_lookup_fails() {
        let broker = MemoryBroker::new();
        broker.set_key(&active_run_key("inst-a", "run-1"), "running");
        broker.fail_keys(true);

        let report = stop_agent_run(&state(&broker, None), "run-1", None).await;
        assert!(report.global_signal_sent);
        assert!(report.instances_signalled.is_empty());
        assert!(report.list_expired);
        assert_eq!(
            broker.expiry("agent_run:run-1:responses"),
            Some(Duration::from_secs(120))
        );
    }

    #[tokio::test]
    async fn test_stop_without_run_store_still_signals() {
        let broker = MemoryBroker::new();
        let report = stop_agent_run(&state(&broker, None), "run-9", None).await;
        assert!(!report.db_updated);
        assert!(report.global_signal_sent);
    }
}
