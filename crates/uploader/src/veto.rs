//! Continuation votes for vetoable lifecycle hooks.
//!
//! A vetoable event halts its operation when any handler result, after
//! pending results are awaited, is one of `false`, `0`, `""` or `null`.
//! An unset result (a handler returning `()`) is not a halting value, so a
//! handler that forgets to return anything approves the operation.

use futures_util::future::join_all;
use serde_json::Value;

use crate::events::HookResult;

/// Returns `true` if `value` belongs to the halt set `{false, 0, "", null}`.
pub fn is_halt_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Resolves handler results and decides whether the operation continues.
///
/// No handlers (an empty `results`) always continues.
pub async fn can_continue(results: Vec<HookResult>) -> bool {
    if results.is_empty() {
        return true;
    }
    let resolved = join_all(results.into_iter().map(HookResult::resolve)).await;
    !resolved
        .iter()
        .any(|r| matches!(r, HookResult::Value(v) if is_halt_value(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn halt_set() {
        assert!(is_halt_value(&json!(false)));
        assert!(is_halt_value(&json!(0)));
        assert!(is_halt_value(&json!(0.0)));
        assert!(is_halt_value(&json!("")));
        assert!(is_halt_value(&Value::Null));
    }

    #[test]
    fn outside_halt_set() {
        assert!(!is_halt_value(&json!(true)));
        assert!(!is_halt_value(&json!(1)));
        assert!(!is_halt_value(&json!("no")));
        assert!(!is_halt_value(&json!([])));
        assert!(!is_halt_value(&json!({})));
    }

    #[tokio::test]
    async fn empty_results_continue() {
        assert!(can_continue(Vec::new()).await);
    }

    #[tokio::test]
    async fn unset_continues() {
        assert!(can_continue(vec![HookResult::Unset, true.into()]).await);
    }

    #[tokio::test]
    async fn any_halt_stops() {
        assert!(!can_continue(vec![true.into(), false.into(), HookResult::Unset]).await);
        assert!(!can_continue(vec![HookResult::Value(Value::Null)]).await);
    }

    #[tokio::test]
    async fn pending_results_are_awaited() {
        let halting = HookResult::pending(async {
            tokio::task::yield_now().await;
            0i64
        });
        assert!(!can_continue(vec![halting]).await);

        let approving = HookResult::pending(async { "go" });
        assert!(can_continue(vec![approving]).await);

        let unset = HookResult::pending(async {});
        assert!(can_continue(vec![unset]).await);
    }
}
