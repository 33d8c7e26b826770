use std::{
    io::{BufRead, BufReader, Read, Write},
    net::TcpListener,
    sync::{Arc, Mutex},
    thread,
};

use serde_json::Value;

/// A stand-in for the execution engine: records every request and answers with whatever `respond`
/// returns for it, or nothing.
pub(crate) struct FakeEngine {
    addr: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeEngine {
    pub(crate) fn start(respond: impl Fn(&Value) -> Option<Value> + Send + 'static) -> FakeEngine {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    return;
                };
                let request = serde_json::Deserializer::from_reader(&stream)
                    .into_iter::<Value>()
                    .next();
                let Some(Ok(request)) = request else {
                    continue;
                };
                recorded.lock().unwrap().push(request.clone());
                if let Some(response) = respond(&request) {
                    let _ = serde_json::to_writer(&mut stream, &response);
                }
            }
        });
        FakeEngine { addr, requests }
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_for(&self, cmd: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|request| request["cmd"] == cmd)
            .collect()
    }
}

/// A stand-in for an HTTP collaborator: records the path and body of every POST and answers each with
/// the same response.
pub(crate) struct FakeHttpServer {
    addr: String,
    requests: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl FakeHttpServer {
    /// Answer with `status` and `body`, framed by `Content-Length`.
    pub(crate) fn start(status: &'static str, body: Vec<u8>) -> FakeHttpServer {
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(&body);
        FakeHttpServer::start_raw(response)
    }

    /// Answer with `200 OK` and `body`, sent as a single chunk of a chunked transfer.
    pub(crate) fn start_chunked(body: &[u8]) -> FakeHttpServer {
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:x}\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response.extend_from_slice(b"\r\n0\r\n\r\n");
        FakeHttpServer::start_raw(response)
    }

    fn start_raw(response: Vec<u8>) -> FakeHttpServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let path = request_line.split_whitespace().nth(1).unwrap_or_default().to_string();
                let mut content_length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    let header = header.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut request_body = vec![0u8; content_length];
                reader.read_exact(&mut request_body).unwrap();
                recorded.lock().unwrap().push((path, request_body));

                let _ = stream.write_all(&response);
            }
        });
        FakeHttpServer { addr, requests }
    }

    pub(crate) fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn requests(&self) -> Vec<(String, Vec<u8>)> {
        self.requests.lock().unwrap().clone()
    }
}
