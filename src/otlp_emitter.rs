use reqwest::Client;
use serde_json::json;

use crate::error::AppError;
use crate::span_assembler::AssembledSpan;

/// Wraps a single assembled span in the fixed OTLP resource-spans envelope
/// and POSTs it to the configured collector. Failure is surfaced to the
/// caller as an `EmitFailure`; there is no local retry (at-least-once
/// delivery is provided by the upstream emitter retrying the raw event, and
/// `SpanDedupe` absorbs the resulting duplicates).
pub struct OtlpEmitter {
    client: Client,
    collector_url: String,
    service_name: String,
}

impl OtlpEmitter {
    pub fn new(client: Client, collector_url: String, service_name: String) -> Self {
        Self { client, collector_url, service_name }
    }

    pub async fn emit(&self, trace_id: &str, span: &AssembledSpan) -> Result<(), AppError> {
        let payload = json!({
            "resourceSpans": [{
                "resource": {
                    "attributes": [
                        {"key": "service.name", "value": {"stringValue": self.service_name}}
                    ]
                },
                "scopeSpans": [{
                    "spans": [{
                        "traceId": trace_id,
                        "spanId": span.span_id,
                        "parentSpanId": span.parent_span_id,
                        "startTimeUnixNano": span.start_ns,
                        "endTimeUnixNano": span.end_ns,
                        "name": format!("{}_{}", span.span_name, span.node_id),
                        "kind": 2,
                    }]
                }]
            }]
        });

        let resp = self
            .client
            .post(&self.collector_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::EmitFailure(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AppError::EmitFailure(format!("collector returned {}", resp.status())));
        }
        Ok(())
    }
}
