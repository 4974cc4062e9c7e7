//! Shared fixtures: a scriptable runtime adapter and a minimal HTTP
//! worker for exercising the external dispatch path end to end.

use agentmesh_core::Result;
use agentmesh_runtime::adapter::{AdapterRequest, InvokeOutcome, RuntimeAdapter};
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Adapter whose behavior is scripted through the agent's system
/// prompt: "fail" errors, "slow" stalls until cancelled or 2s, anything
/// else echoes. Inputs are captured for assertions.
pub struct ScriptedAdapter {
    pub seen_inputs: Mutex<Vec<(String, Value)>>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            seen_inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl RuntimeAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        request: AdapterRequest,
        cancel: CancellationToken,
    ) -> Result<InvokeOutcome> {
        self.seen_inputs
            .lock()
            .unwrap()
            .push((request.agent_id.to_string(), request.input.clone()));

        match request.system_prompt.as_str() {
            "fail" => Err(agentmesh_core::Error::external("scripted failure")),
            "slow" => {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                    _ = cancel.cancelled() => {
                        return Err(agentmesh_core::Error::internal("cancelled"));
                    }
                }
                Ok(InvokeOutcome {
                    output: json!({"slow": true}),
                    llm_usage: None,
                })
            }
            _ => Ok(InvokeOutcome {
                output: json!({"agent": request.agent_id.to_string(), "echo": request.input}),
                llm_usage: Some(agentmesh_core::LlmUsage {
                    model: request.model.clone(),
                    tokens: 42,
                    cost: 0.001,
                }),
            }),
        }
    }
}

/// Minimal HTTP worker: 200 on `GET /health`, echoes on `POST /invoke`.
/// Good enough for reqwest with `connection: close`.
pub async fn spawn_fake_worker(output: Value) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let output = output.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16384];
                let mut total = 0;
                loop {
                    match stream.read(&mut buf[total..]).await {
                        Ok(0) => break,
                        Ok(n) => {
                            total += n;
                            if buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                            if total == buf.len() {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let head = String::from_utf8_lossy(&buf[..total]);
                let body = if head.starts_with("GET") {
                    json!({"status": "healthy"}).to_string()
                } else {
                    json!({
                        "output": output,
                        "llm_usage": {"model": "fake", "tokens": 7, "cost": 0.0}
                    })
                    .to_string()
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}
