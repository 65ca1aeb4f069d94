use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum ChatBehavior {
    /// Answer every prompt with a deterministic summary, prefixed with a
    /// `<think>` segment the client must strip.
    Summarize,
    /// Fail the first N requests with the given status, then summarize.
    FailFirst { failures: usize, status: u16 },
    /// Fail every request with the given status.
    AlwaysFail { status: u16 },
    /// Succeed with content that is empty once `<think>` is stripped.
    EmptyContent,
}

pub struct OllamaStub {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OllamaStub {
    pub fn spawn(behavior: ChatBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start ollama stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                if request.method() != &tiny_http::Method::Post || path != "/api/chat" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let seen = counter.fetch_add(1, Ordering::SeqCst);

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                let failing_status = match behavior {
                    ChatBehavior::FailFirst { failures, status } if seen < failures => {
                        Some(status)
                    }
                    ChatBehavior::AlwaysFail { status } => Some(status),
                    _ => None,
                };
                if let Some(status) = failing_status {
                    let _ = request.respond(
                        tiny_http::Response::from_string("stub failure")
                            .with_status_code(status),
                    );
                    continue;
                }

                let Some(prompt) = parsed
                    .pointer("/messages/1/content")
                    .and_then(|v| v.as_str())
                else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("missing user message")
                            .with_status_code(400),
                    );
                    continue;
                };

                let content = match behavior {
                    ChatBehavior::EmptyContent => "<think>solo razonamiento</think>".to_owned(),
                    _ => summary_for(prompt),
                };

                let stream = parsed
                    .get("stream")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let response_body = if stream {
                    ndjson_stream(&content)
                } else {
                    serde_json::json!({
                        "model": parsed.get("model").cloned().unwrap_or(Value::Null),
                        "message": { "role": "assistant", "content": content },
                        "done": true
                    })
                    .to_string()
                };

                let content_type = if stream {
                    "application/x-ndjson"
                } else {
                    "application/json"
                };
                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    content_type.as_bytes(),
                )
                .expect("build header");
                let response = tiny_http::Response::from_string(response_body)
                    .with_status_code(200)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[allow(dead_code)]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for OllamaStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Deterministic answer keyed on the prompt kind. Map prompts carry a
/// `--- CONTENIDO (n/total) ---` marker, fusion prompts start with
/// `Fusiona`, title repairs start with `Corrige el espaciado`, everything
/// else is the book-level prompt.
fn summary_for(prompt: &str) -> String {
    if prompt.starts_with("Corrige el espaciado") {
        "El Título Reparado".to_owned()
    } else if prompt.contains("--- CONTENIDO") {
        let title = extract_between(prompt, "«", "»").unwrap_or("el capítulo");
        format!(
            "<think>razonamiento oculto</think>El pasaje de «{title}» desarrolla sus ideas \
centrales con detalle. Aporta ejemplos y matiza los argumentos previos. Cierra con una \
conclusión parcial del tema."
        )
    } else if prompt.starts_with("Fusiona") {
        "<think>uniendo fragmentos</think>El capítulo construye un argumento continuo a lo \
largo de sus secciones. Desarrolla las ideas con ejemplos concretos. Termina con una síntesis \
clara de lo expuesto."
            .to_owned()
    } else {
        "La obra recorre sus temas centrales capítulo a capítulo. Presenta los argumentos con \
claridad y los conecta entre sí. Concluye con una visión de conjunto del libro."
            .to_owned()
    }
}

fn ndjson_stream(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut lines = Vec::new();
    for piece in chars.chunks(24) {
        let piece: String = piece.iter().collect();
        lines.push(
            serde_json::json!({
                "message": { "role": "assistant", "content": piece },
                "done": false
            })
            .to_string(),
        );
    }
    lines.push(
        serde_json::json!({
            "message": { "role": "assistant", "content": "" },
            "done": true
        })
        .to_string(),
    );
    lines.join("\n") + "\n"
}

fn extract_between<'a>(text: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = text.find(begin)? + begin.len();
    let rest = &text[start..];
    let end_rel = rest.find(end)?;
    Some(&rest[..end_rel])
}
