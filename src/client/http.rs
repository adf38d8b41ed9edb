//! HTTPS imageio client.
//!
//! Talks to the imageio service fronting block storage: extent
//! enumeration, ranged reads and writes, zero and flush. Ranges are
//! streamed one bounded chunk at a time in both directions, so memory use
//! stays at one chunk regardless of extent size.

use std::io::{self, Read, Write};
use std::time::Duration;

use reqwest::blocking::Response;
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::client::{ExtentsContext, ImageioClient, CHUNK_SIZE};
use crate::error::{Result, StreamError};
use crate::extent::{Extent, ExtentKind};

/// One extent as reported by the service.
#[derive(Debug, Deserialize)]
struct WireExtent {
    start: u64,
    length: u64,
    #[serde(default)]
    zero: bool,
    #[serde(default)]
    dirty: bool,
}

/// Capability advertisement from the `OPTIONS` probe.
#[derive(Debug, Default, Deserialize)]
struct ServerOptions {
    #[serde(default)]
    features: Vec<String>,
}

pub struct HttpClient {
    http: reqwest::blocking::Client,
    url: Url,
    features: Vec<String>,
    size: Option<u64>,
}

impl HttpClient {
    /// Connect to a transfer URL and probe the server's capabilities.
    ///
    /// With `secure` false, server certificates are not validated; test
    /// deployments run with self-signed certificates.
    pub fn connect(url: &str, secure: bool) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| StreamError::Transport(format!("invalid transfer URL {url:?}: {err}")))?;

        // Transfers of large images run for a long time; only the connect
        // phase gets a deadline.
        let http = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(!secure)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()?;

        let mut client = Self {
            http,
            url,
            features: Vec::new(),
            size: None,
        };
        client.features = client.options()?.features;
        debug!(url = %client.url, features = ?client.features, "connected");
        Ok(client)
    }

    fn options(&self) -> Result<ServerOptions> {
        let resp = self
            .http
            .request(Method::OPTIONS, self.url.clone())
            .send()?;
        Ok(check_status(resp)?.json()?)
    }

    fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }

    fn extents_url(&self, context: ExtentsContext) -> Result<Url> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| StreamError::Transport("transfer URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("extents");
        url.query_pairs_mut()
            .append_pair("context", context.as_str());
        Ok(url)
    }
}

fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(StreamError::Transport(format!(
        "server returned {status}: {}",
        body.trim()
    )))
}

impl ImageioClient for HttpClient {
    fn size(&mut self) -> Result<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        // The service does not report the virtual size directly; the end
        // of the last extent is it.
        let extents = self.extents(ExtentsContext::Zero)?;
        let size = extents.last().map(|e| e.end()).unwrap_or(0);
        self.size = Some(size);
        Ok(size)
    }

    fn extents(&mut self, context: ExtentsContext) -> Result<Vec<Extent>> {
        if !self.has_feature("extents") {
            return Err(StreamError::UnsupportedContext(format!(
                "server does not support extent enumeration ({context} requested)"
            )));
        }

        let resp = self.http.get(self.extents_url(context)?).send()?;
        if context == ExtentsContext::Dirty && resp.status() == StatusCode::NOT_FOUND {
            return Err(StreamError::UnsupportedContext(
                "dirty extents are not available for this transfer".to_string(),
            ));
        }
        let wire: Vec<WireExtent> = check_status(resp)?.json()?;
        debug!(context = %context, count = wire.len(), "enumerated extents");

        Ok(wire
            .into_iter()
            .map(|e| Extent {
                start: e.start,
                length: e.length,
                kind: if e.zero {
                    ExtentKind::Zero
                } else {
                    ExtentKind::Data
                },
                dirty: e.dirty,
            })
            .collect())
    }

    fn write_to(&mut self, sink: &mut dyn Write, offset: u64, length: u64) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        let last = offset + length - 1;
        let resp = self
            .http
            .get(self.url.clone())
            .header(header::RANGE, format!("bytes={offset}-{last}"))
            .send()?;
        let mut resp = check_status(resp)?;

        let mut buf = vec![0u8; CHUNK_SIZE.min(length as usize)];
        let mut done = 0u64;
        loop {
            let count = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::Transport(err.to_string())),
            };
            done += count as u64;
            if done > length {
                return Err(StreamError::Transport(format!(
                    "server sent more than {length} bytes for range at {offset}"
                )));
            }
            sink.write_all(&buf[..count])?;
        }
        if done < length {
            return Err(StreamError::ShortIo(format!(
                "server sent {done} of {length} bytes for range at {offset}"
            )));
        }
        Ok(())
    }

    fn read_from(&mut self, source: &mut dyn Read, offset: u64, length: u64) -> Result<()> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut pos = offset;
        let end = offset + length;
        while pos < end {
            let count = CHUNK_SIZE.min((end - pos) as usize);
            source.read_exact(&mut buf[..count]).map_err(|err| {
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    StreamError::ShortIo(format!(
                        "stream ended inside a {length} byte data frame body"
                    ))
                } else {
                    StreamError::Io(err)
                }
            })?;

            let last = pos + count as u64 - 1;
            let resp = self
                .http
                .put(self.url.clone())
                .header(header::CONTENT_RANGE, format!("bytes {pos}-{last}/*"))
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .query(&[("flush", "n")])
                .body(buf[..count].to_vec())
                .send()?;
            check_status(resp)?;
            pos += count as u64;
        }
        Ok(())
    }

    fn zero(&mut self, offset: u64, length: u64) -> Result<()> {
        let resp = self
            .http
            .patch(self.url.clone())
            .json(&serde_json::json!({
                "op": "zero",
                "offset": offset,
                "size": length,
                "flush": false,
            }))
            .send()?;
        check_status(resp)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let resp = self
            .http
            .patch(self.url.clone())
            .json(&serde_json::json!({ "op": "flush" }))
            .send()?;
        check_status(resp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_extent_mapping() {
        let wire: Vec<WireExtent> = serde_json::from_str(
            r#"[{"start": 0, "length": 4096, "zero": false},
                {"start": 4096, "length": 8192, "zero": true, "hole": true},
                {"start": 12288, "length": 4096, "dirty": true}]"#,
        )
        .unwrap();
        assert_eq!(wire.len(), 3);
        assert!(!wire[0].zero && !wire[0].dirty);
        assert!(wire[1].zero);
        assert!(wire[2].dirty);
    }

    #[test]
    fn test_extents_url() {
        let client_url = "https://imageio.example:54322/images/ticket-1234";
        let url = Url::parse(client_url).unwrap();
        let client = HttpClient {
            http: reqwest::blocking::Client::new(),
            url,
            features: vec!["extents".to_string()],
            size: None,
        };
        let extents = client.extents_url(ExtentsContext::Dirty).unwrap();
        assert_eq!(
            extents.as_str(),
            "https://imageio.example:54322/images/ticket-1234/extents?context=dirty"
        );
    }
}
