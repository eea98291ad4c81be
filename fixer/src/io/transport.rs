//! Rate-limited transport: retries engine calls through connectivity failures
//! and throttling, surfacing everything else as a fatal [`EngineError`].

use tracing::{debug, instrument, warn};

use crate::core::backoff::{BackoffPolicy, RetryState};
use crate::core::conversation::AssistantTurn;
use crate::io::engine::{Engine, EngineCallError, EngineError, EngineRequest};
use crate::io::sleep::Sleeper;

pub struct RateLimitedTransport<E, S> {
    engine: E,
    sleeper: S,
    policy: BackoffPolicy,
}

impl<E: Engine, S: Sleeper> RateLimitedTransport<E, S> {
    pub fn new(engine: E, sleeper: S, policy: BackoffPolicy) -> Self {
        Self {
            engine,
            sleeper,
            policy,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Send `request`, blocking until a turn arrives or a non-retryable error occurs.
    ///
    /// There is no attempt ceiling: a persistently unreachable engine keeps this
    /// call waiting at the maximum backoff delay until the sleeper reports an
    /// interrupt.
    #[instrument(skip_all, fields(turns = request.turns.len()))]
    pub fn send(&self, request: &EngineRequest<'_>) -> Result<AssistantTurn, EngineError> {
        let mut retry = RetryState::new(self.policy);
        loop {
            if self.sleeper.interrupted() {
                return Err(EngineError {
                    status: None,
                    message: "interrupted".to_string(),
                });
            }
            match self.engine.complete(request) {
                Ok(turn) => {
                    if retry.attempt() > 0 {
                        debug!(attempts = retry.attempt(), "engine call recovered");
                    }
                    return Ok(turn);
                }
                Err(EngineCallError::Connection(message)) => {
                    let wait = retry.on_connection_error();
                    warn!(
                        attempt = retry.attempt(),
                        wait_ms = wait.as_millis() as u64,
                        error = %message,
                        "engine connection failed, backing off"
                    );
                    self.sleeper.sleep(wait);
                }
                Err(EngineCallError::Throttled {
                    retry_after,
                    reset_at,
                    message,
                }) => {
                    let wait = retry.on_throttled(retry_after);
                    warn!(
                        attempt = retry.attempt(),
                        wait_ms = wait.as_millis() as u64,
                        reset_at = reset_at.as_deref().unwrap_or("unknown"),
                        error = %message,
                        "engine rate limited"
                    );
                    self.sleeper.sleep(wait);
                }
                Err(EngineCallError::Status { status, message }) => {
                    warn!(status, error = %message, "engine rejected request");
                    return Err(EngineError {
                        status: Some(status),
                        message,
                    });
                }
                Err(EngineCallError::Decode(message)) => {
                    return Err(EngineError {
                        status: None,
                        message,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::AssistantBlock;
    use crate::io::sleep::InterruptFlag;
    use crate::test_support::{RecordingSleeper, ScriptedEngine};
    use std::time::Duration;

    fn text_turn(text: &str) -> AssistantTurn {
        AssistantTurn::new(vec![AssistantBlock::Text {
            text: text.to_string(),
        }])
    }

    fn request() -> EngineRequest<'static> {
        EngineRequest {
            system: "",
            turns: &[],
            tools: &[],
        }
    }

    fn throttled(retry_after: Option<u64>) -> EngineCallError {
        EngineCallError::Throttled {
            retry_after: retry_after.map(Duration::from_secs),
            reset_at: None,
            message: "slow down".to_string(),
        }
    }

    fn connection() -> EngineCallError {
        EngineCallError::Connection("reset by peer".to_string())
    }

    #[test]
    fn throttle_waits_declared_retry_after() {
        let engine = ScriptedEngine::new();
        engine.push_error(throttled(Some(2)));
        engine.push_turn(text_turn("done"));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        let turn = transport.send(&request()).expect("send");
        assert_eq!(turn.text(), "done");
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn throttle_does_not_grow_backoff() {
        let engine = ScriptedEngine::new();
        engine.push_error(connection());
        engine.push_error(connection());
        engine.push_error(throttled(Some(2)));
        engine.push_error(throttled(None));
        engine.push_error(connection());
        engine.push_turn(text_turn("done"));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        transport.send(&request()).expect("send");
        let secs: Vec<u64> = sleeper.slept().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 2, 4, 4]);
    }

    #[test]
    fn each_request_starts_from_initial_delay() {
        let engine = ScriptedEngine::new();
        engine.push_error(connection());
        engine.push_error(connection());
        engine.push_turn(text_turn("first"));
        engine.push_error(connection());
        engine.push_turn(text_turn("second"));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        transport.send(&request()).expect("first");
        transport.send(&request()).expect("second");
        let secs: Vec<u64> = sleeper.slept().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 1]);
    }

    #[test]
    fn status_errors_are_fatal_without_retry() {
        let engine = ScriptedEngine::new();
        engine.push_error(EngineCallError::Status {
            status: 400,
            message: "invalid tool schema".to_string(),
        });
        engine.push_turn(text_turn("never reached"));
        let sleeper = RecordingSleeper::default();
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        let err = transport.send(&request()).unwrap_err();
        assert_eq!(err.status, Some(400));
        assert!(err.to_string().contains("invalid tool schema"));
        assert!(sleeper.slept().is_empty());
        assert_eq!(engine.remaining(), 1);
    }

    #[test]
    fn interrupt_stops_retrying() {
        let engine = ScriptedEngine::new();
        engine.push_error(connection());
        engine.push_turn(text_turn("never reached"));
        let flag = InterruptFlag::new();
        engine.interrupt_after(1, flag.clone());
        let sleeper = RecordingSleeper::with_interrupt(flag);
        let transport = RateLimitedTransport::new(&engine, &sleeper, BackoffPolicy::default());

        let err = transport.send(&request()).unwrap_err();
        assert_eq!(err.message, "interrupted");
        assert_eq!(err.status, None);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(1)]);
        assert_eq!(engine.remaining(), 1);
    }
}
