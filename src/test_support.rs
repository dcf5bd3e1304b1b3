//! Loopback stand-in for the Kinesis JSON API, one connection per request.

use std::sync::{Arc, Mutex};

use aws_config::BehaviorVersion;
use aws_sdk_kinesis::{
    config::{retry::RetryConfig, Credentials, Region},
    Client, Config,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Answers `(operation, request body, prior calls to the same operation)`.
type Responder = Arc<dyn Fn(&str, &str, usize) -> Reply + Send + Sync>;

pub(crate) struct Reply {
    status: u16,
    body: String,
}

impl Reply {
    pub(crate) fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub(crate) fn error(kind: &str) -> Self {
        Self {
            status: 400,
            body: format!(r#"{{"__type":"{kind}","message":"{kind}"}}"#),
        }
    }
}

struct Call {
    operation: String,
    body: String,
}

pub(crate) struct FakeKinesis {
    endpoint: String,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeKinesis {
    pub(crate) async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &str, usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let respond: Responder = Arc::new(respond);

        let server_calls = calls.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, respond.clone(), server_calls.clone()));
            }
        });

        Self { endpoint, calls }
    }

    pub(crate) fn client(&self) -> Client {
        let config = Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&self.endpoint)
            .credentials_provider(Credentials::new("test", "test", None, None, "fake"))
            .retry_config(RetryConfig::disabled())
            .build();
        Client::from_conf(config)
    }

    /// Request bodies received for `operation`, oldest first.
    pub(crate) fn calls(&self, operation: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.body.clone())
            .collect()
    }
}

pub(crate) fn record_json(sequence_number: &str, base64_data: &str) -> String {
    format!(
        r#"{{"SequenceNumber":"{sequence_number}","Data":"{base64_data}","PartitionKey":"pk"}}"#
    )
}

pub(crate) fn shard_json(shard_id: &str) -> String {
    format!(
        r#"{{"ShardId":"{shard_id}","HashKeyRange":{{"StartingHashKey":"0","EndingHashKey":"1"}},"SequenceNumberRange":{{"StartingSequenceNumber":"0"}}}}"#
    )
}

async fn serve(mut stream: TcpStream, respond: Responder, calls: Arc<Mutex<Vec<Call>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    };
    let length: usize = header("content-length")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let body = String::from_utf8_lossy(&buf[header_end..header_end + length]).into_owned();
    let operation = header("x-amz-target")
        .and_then(|target| target.rsplit('.').next().map(str::to_string))
        .unwrap_or_default();

    let nth = {
        let mut calls = calls.lock().unwrap();
        let nth = calls
            .iter()
            .filter(|call| call.operation == operation)
            .count();
        calls.push(Call {
            operation: operation.clone(),
            body: body.clone(),
        });
        nth
    };

    let reply = respond(&operation, &body, nth);
    let reason = if reply.status == 200 { "OK" } else { "Bad Request" };
    let response = format!(
        "HTTP/1.1 {} {reason}\r\ncontent-type: application/x-amz-json-1.1\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        reply.status,
        reply.body.len(),
        reply.body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
