//! CALL dispatch.
//!
//! Procedures are plain functions from a CALL to a RESULT, looked up by
//! procedure uri. The table is intentionally small; this broker is a
//! pub/sub system first.

use serde_json::json;

use crate::transport::message::{CallMessage, ResultMessage};

type Procedure = fn(&CallMessage) -> ResultMessage;

fn ping(call: &CallMessage) -> ResultMessage {
    ResultMessage {
        request_id: call.request_id,
        details: call.options.clone(),
        args: vec![json!("Ping response")],
        kwargs: json!({}),
    }
}

/// Run the procedure registered under `call.procedure`, or `None` when no
/// such procedure exists.
pub fn dispatch(call: &CallMessage) -> Option<ResultMessage> {
    let procedure: Procedure = match call.procedure.as_str() {
        "ping" => ping,
        _ => return None,
    };
    Some(procedure(call))
}
