//! Built-in workflow definitions.
//!
//! Workflows are registered in code at startup; the HTTP API creates
//! instances of them by name. The order pipeline below doubles as a
//! living example of the step/sleep/wait surface.

use std::time::Duration;

use serde_json::{Value, json};
use stepflow_core::{Engine, JournalRepository};

/// Register every built-in workflow on the engine.
pub fn register_builtin<R: JournalRepository + 'static>(engine: &Engine<R>) {
    register_order_pipeline(engine);
}

/// A three-phase order pipeline: fetch and total the order lines, let
/// the payment settle, then wait up to an hour for an approval event.
fn register_order_pipeline<R: JournalRepository + 'static>(engine: &Engine<R>) {
    engine.register("order-pipeline", |ctx, params: Value| async move {
        let items = ctx
            .step("fetch-items", || async {
                // Stand-in for an order lookup against an external system.
                Ok(json!([1, 2, 3]))
            })
            .await?;

        let total = {
            let items = items.clone();
            ctx.step("sum-items", move || {
                let items = items.clone();
                async move {
                    let sum: i64 = items
                        .as_array()
                        .map(|a| a.iter().filter_map(Value::as_i64).sum())
                        .unwrap_or(0);
                    Ok(json!(sum))
                }
            })
            .await?
        };

        ctx.sleep("settle", Duration::from_secs(5)).await?;

        let approval = ctx
            .wait_for_event("approval", Duration::from_secs(3600))
            .await?;

        Ok(json!({
            "customer": params.get("email").cloned().unwrap_or(Value::Null),
            "items": items,
            "total": total,
            "approved": !approval.is_timed_out(),
        }))
    });
}
