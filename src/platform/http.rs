//! Synchronous HTTP plumbing between the harness and the tested server.

use std::io::Read;
use std::time::Duration;

use flate2::read::MultiGzDecoder;

use crate::{Finding, FindingKind, Query};

/// Response view consumed by the verification phases. Error statuses are
/// flattened into ordinary responses; only transport failures are findings.
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub server: Option<String>,
    reader: Box<dyn Read + Send + 'static>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("server", &self.server)
            .field("reader", &"<stream>")
            .finish()
    }
}

impl HttpResponse {
    /// Raw body stream, decompressed only if the server actually applied
    /// gzip. Used for directory listings, where compression is permitted but
    /// not required.
    pub fn into_body(self) -> Box<dyn Read + Send + 'static> {
        if self.content_encoding.as_deref() == Some("gzip") {
            Box::new(MultiGzDecoder::new(self.reader))
        } else {
            self.reader
        }
    }

    /// Body stream for a GET that negotiated compression: the server must
    /// have answered with `Content-Encoding: gzip`.
    pub fn into_compressed_body(self) -> Result<Box<dyn Read + Send + 'static>, Finding> {
        match self.content_encoding.as_deref() {
            Some("gzip") => Ok(Box::new(MultiGzDecoder::new(self.reader))),
            other => Err(Finding::assertion(
                "content_encoding",
                format!("expected gzip-compressed response, got {other:?}"),
            )),
        }
    }

    pub fn into_raw_body(self) -> Box<dyn Read + Send + 'static> {
        self.reader
    }

    #[cfg(test)]
    pub(crate) fn stub(
        status: u16,
        content_length: Option<u64>,
        content_type: Option<&str>,
        content_encoding: Option<&str>,
        server: Option<&str>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            status,
            content_length,
            content_type: content_type.map(str::to_string),
            content_encoding: content_encoding.map(str::to_string),
            server: server.map(str::to_string),
            reader: Box::new(std::io::Cursor::new(body)),
        }
    }
}

/// Sends one query to the tested server and captures the response.
pub fn send_query(base_url: &str, query: &Query) -> Result<HttpResponse, Finding> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(60))
        .timeout_write(Duration::from_secs(60))
        .build();

    let url = format!("{base_url}/{}", query.path);
    let mut request = agent.request(query.method.as_str(), &url);

    if query.create_directory {
        request = request.set("Create-Directory", "True");
    }
    if query.remove_directory {
        request = request.set("Remove-Directory", "True");
    }
    if !query.host_header.is_empty() {
        request = request.set("Host", &query.host_header);
    }
    if query.gzip {
        request = request.set("Accept-Encoding", "gzip");
    }

    let result = match &query.file_content {
        Some(file) => request
            .set("Content-Length", &file.size.to_string())
            .send(file.open()),
        None => request.call(),
    };

    let response = match result {
        Ok(resp) => resp,
        Err(ureq::Error::Status(_, resp)) => resp,
        Err(ureq::Error::Transport(err)) => {
            return Err(Finding {
                kind: FindingKind::Assertion,
                title: "http_transport".to_string(),
                message: format!("failed to run query on server: {err}"),
            });
        }
    };

    Ok(capture(response))
}

fn capture(response: ureq::Response) -> HttpResponse {
    let status = response.status();
    let content_length = response
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok());
    let content_type = response.header("Content-Type").map(str::to_string);
    let content_encoding = response
        .header("Content-Encoding")
        .map(|v| v.trim().to_ascii_lowercase());
    let server = response.header("Server").map(str::to_string);

    HttpResponse {
        status,
        content_length,
        content_type,
        content_encoding,
        server,
        reader: Box::new(response.into_reader()),
    }
}

/// Bounded readiness probe: any HTTP response (including an error status)
/// means the server is accepting connections.
pub fn probe_ready(base_url: &str, attempts: u32) -> Result<(), Finding> {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(1))
        .build();

    for attempt in 0..attempts {
        match agent.get(base_url).call() {
            Ok(_) | Err(ureq::Error::Status(_, _)) => return Ok(()),
            Err(ureq::Error::Transport(err)) => {
                tracing::debug!(attempt, %err, "waiting 100ms for server startup");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    Err(Finding {
        kind: FindingKind::Readiness,
        title: "server_not_ready".to_string(),
        message: format!("server did not start within {attempts} probe attempts"),
    })
}
