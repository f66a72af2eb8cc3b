//! Worker body - ワーカースレッドの中で 1 メッセージを処理する
//!
//! # 約束
//! - 受け取ったタスクメッセージ 1 つにつき、返信はちょうど 1 つ
//! - パースできないメッセージでも黙って止まらない
//!   - id が取り出せれば、そのタスクの失敗として返す
//!   - 取り出せなければ Fatal として外に知らせ、プールにワーカーを退役させる
//! - 変換関数の panic も失敗結果に変換する

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::domain::envelope::{recover_id, ResultMessage, TaskMessage};
use crate::domain::SerializedError;
use crate::ports::Transform;

/// What a worker sends back for one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// An encoded `ResultMessage`.
    Result(String),

    /// The message had no recoverable correlation id.
    Fatal(String),
}

pub fn handle_message(transform: &dyn Transform, raw: &str) -> Reply {
    let message = match TaskMessage::decode(raw) {
        Ok(message) => message,
        Err(e) => {
            return match recover_id(raw) {
                Some(id) => encode(ResultMessage::failure(
                    id,
                    &SerializedError::new("MalformedMessage", e.to_string()),
                )),
                None => Reply::Fatal(format!("unparseable task message: {e}")),
            };
        }
    };

    let options = message
        .options
        .unwrap_or_else(|| transform.default_options());

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        transform.transform(&message.payload, &options)
    }));

    let reply = match result {
        Ok(Ok(output)) => ResultMessage::success(message.id, output),
        Ok(Err(e)) => ResultMessage::failure(message.id, &e.into()),
        Err(panic) => ResultMessage::failure(
            message.id,
            &SerializedError::generic(panic_message(panic.as_ref())),
        ),
    };
    encode(reply)
}

fn encode(reply: ResultMessage) -> Reply {
    match reply.encode() {
        Ok(raw) => Reply::Result(raw),
        Err(e) => Reply::Fatal(format!("could not encode result for {}: {e}", reply.id())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("transform panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("transform panicked: {s}")
    } else {
        "transform panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskError;
    use crate::testing::{EchoOptions, Panicky, Upper};

    fn outcome(reply: Reply) -> (String, crate::domain::Outcome) {
        let Reply::Result(raw) = reply else {
            panic!("expected a result reply, got {reply:?}");
        };
        let msg = ResultMessage::decode(&raw).unwrap();
        (msg.id().to_string(), msg.into_outcome())
    }

    #[test]
    fn success_echoes_id_and_output() {
        let raw = r#"{"id":"task-1","payload":"abc"}"#;
        let (id, result) = outcome(handle_message(&Upper, raw));
        assert_eq!(id, "task-1");
        assert_eq!(result.unwrap(), "ABC");
    }

    #[test]
    fn transform_failure_becomes_application_error() {
        let raw = r#"{"id":"task-2","payload":"fail"}"#;
        let (id, result) = outcome(handle_message(&Upper, raw));
        assert_eq!(id, "task-2");
        match result.unwrap_err() {
            TaskError::Application(e) => {
                assert_eq!(e.name, "SyntaxError");
                assert!(e.message.contains("Unexpected token"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_options_fall_back_to_defaults() {
        let raw = r#"{"id":"task-3","payload":"x"}"#;
        let (_, result) = outcome(handle_message(&EchoOptions, raw));
        assert_eq!(result.unwrap(), r#"{"default":true}"#);

        let raw = r#"{"id":"task-4","payload":"x","options":{"level":2}}"#;
        let (_, result) = outcome(handle_message(&EchoOptions, raw));
        assert_eq!(result.unwrap(), r#"{"level":2}"#);
    }

    #[test]
    fn panic_is_reported_as_generic_error() {
        let raw = r#"{"id":"task-5","payload":"x"}"#;
        let (id, result) = outcome(handle_message(&Panicky, raw));
        assert_eq!(id, "task-5");
        let TaskError::Application(e) = result.unwrap_err() else {
            panic!("expected application error");
        };
        assert_eq!(e.name, "Error");
        assert!(e.message.contains("transform panicked"));
    }

    #[test]
    fn malformed_message_with_id_fails_that_task() {
        let raw = r#"{"id":"task-6","payload":42}"#;
        let (id, result) = outcome(handle_message(&Upper, raw));
        assert_eq!(id, "task-6");
        let TaskError::Application(e) = result.unwrap_err() else {
            panic!("expected application error");
        };
        assert_eq!(e.name, "MalformedMessage");
    }

    #[test]
    fn malformed_message_without_id_is_fatal() {
        let reply = handle_message(&Upper, "big jug hot cheese");
        assert!(matches!(reply, Reply::Fatal(reason) if reason.contains("unparseable")));
    }
}
