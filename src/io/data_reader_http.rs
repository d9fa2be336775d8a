//! Byte source backed by an HTTP(S) endpoint with range support.
//!
//! The TilePackage HTTP contract: every read is a `Range: bytes=start-end`
//! request, the server answers `206 Partial Content` with a matching
//! `Content-Range`, and a strong `ETag` identifies the archive version.
//! A `416` carrying `Content-Range: bytes */N` is treated as the
//! authoritative archive size. A plain `200` answer means the server ignored
//! the range header, which defeats random access and is reported as an error.

use super::{DataReaderTrait, RangeResponse};
use crate::types::{Blob, ByteRange};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use reqwest::{header, Client, Method, Request, StatusCode, Url};
use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	LazyLock,
};
use std::time::Duration;
use tokio::time::sleep;

static RE_CONTENT_RANGE: LazyLock<Regex> = LazyLock::new(|| {
	RegexBuilder::new(r"^bytes (\d+)-(\d+)/(\d+|\*)$")
		.case_insensitive(true)
		.build()
		.unwrap()
});

static RE_UNSATISFIED_RANGE: LazyLock<Regex> = LazyLock::new(|| {
	RegexBuilder::new(r"^bytes \*/(\d+)$")
		.case_insensitive(true)
		.build()
		.unwrap()
});

/// How many extra attempts a flaky connection gets before the read fails.
const GIVE_UP_AFTER: u32 = 3;

/// Strips the weak prefix from an ETag header value.
fn strong_etag(value: &str) -> String {
	value.strip_prefix("W/").unwrap_or(value).to_string()
}

#[derive(Debug)]
pub struct DataReaderHttp {
	client: Client,
	name: String,
	url: Url,
	size: AtomicU64,
	/// Set after a mid-session ETag mismatch; subsequent requests ask the
	/// origin (and any intermediary) for uncached data.
	must_reload: AtomicBool,
}

impl DataReaderHttp {
	/// Opens an HTTP(S) endpoint and discovers the archive size.
	///
	/// The size probe reads 5 bytes at offset 0 and takes the total from the
	/// `Content-Range` answer; servers that omit it get a `HEAD` request
	/// with `Content-Length` as the fallback.
	pub async fn from_url(url: Url) -> Result<DataReaderHttp> {
		match url.scheme() {
			"http" | "https" => (),
			other => bail!("unsupported URL scheme '{other}' in '{url}', expected 'http' or 'https'"),
		}

		let client = Client::builder()
			.tcp_keepalive(Duration::from_secs(600))
			.use_rustls_tls()
			.build()?;

		let reader = DataReaderHttp {
			client,
			name: url.to_string(),
			url,
			size: AtomicU64::new(0),
			must_reload: AtomicBool::new(false),
		};
		let size = reader.probe_size().await.context("failed to determine archive size")?;
		reader.size.store(size, Ordering::Relaxed);
		Ok(reader)
	}

	async fn probe_size(&self) -> Result<u64> {
		let mut request = Request::new(Method::GET, self.url.clone());
		request.headers_mut().append(header::RANGE, "bytes=0-4".parse()?);

		let response = self.client.execute(request).await?;

		if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
			if let Some(total) = total_from_unsatisfied_range(&response) {
				return Ok(total);
			}
		}

		if let Some(content_range) = response.headers().get(header::CONTENT_RANGE) {
			let caps = RE_CONTENT_RANGE
				.captures(content_range.to_str()?)
				.ok_or_else(|| anyhow!("unexpected Content-Range format: '{content_range:?}'"))?;
			if &caps[3] != "*" {
				return Ok(caps[3].parse()?);
			}
		}

		// No Content-Range: fall back to a HEAD request.
		let response = self.client.head(self.url.clone()).send().await?;
		if !response.status().is_success() {
			bail!("HEAD request failed with status {}", response.status());
		}
		response
			.content_length()
			.ok_or_else(|| anyhow!("server reports neither Content-Range nor Content-Length for '{}'", self.url))
	}

	fn build_range_request(&self, range: &ByteRange) -> Result<Request> {
		let mut request = Request::new(Method::GET, self.url.clone());
		let value = format!("bytes={}-{}", range.offset, range.offset + range.length - 1);
		request.headers_mut().append(header::RANGE, value.parse()?);
		if self.must_reload.load(Ordering::Relaxed) {
			request.headers_mut().append(header::CACHE_CONTROL, "no-cache".parse()?);
		}
		Ok(request)
	}
}

fn total_from_unsatisfied_range(response: &reqwest::Response) -> Option<u64> {
	let content_range = response.headers().get(header::CONTENT_RANGE)?.to_str().ok()?;
	let caps = RE_UNSATISFIED_RANGE.captures(content_range)?;
	caps[1].parse().ok()
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
	response
		.headers()
		.get(name)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
}

impl DataReaderHttp {
	/// Issues a single range request. `Ok(None)` means the server rejected
	/// the range with an authoritative archive size (now adopted), so the
	/// caller should simply try again.
	async fn fetch_once(&self, range: &ByteRange) -> Result<Option<RangeResponse>> {
		let request = self.build_range_request(range)?;
		let response = self.client.execute(request).await?;

		match response.status() {
			StatusCode::PARTIAL_CONTENT => {
				let content_range = response
					.headers()
					.get(header::CONTENT_RANGE)
					.ok_or_else(|| anyhow!("response is missing Content-Range header"))?
					.to_str()?;
				let caps = RE_CONTENT_RANGE
					.captures(content_range)
					.ok_or_else(|| anyhow!("unexpected Content-Range format: '{content_range}'"))?;
				let start: u64 = caps[1].parse()?;
				let end: u64 = caps[2].parse()?;
				if start != range.offset || end != range.offset + range.length - 1 {
					bail!(
						"Content-Range mismatch: requested {}-{}, got {start}-{end}",
						range.offset,
						range.offset + range.length - 1
					);
				}
			}
			StatusCode::RANGE_NOT_SATISFIABLE => {
				// The archive shrank (or our probe was wrong): adopt the
				// size the server reports.
				let total = total_from_unsatisfied_range(&response)
					.ok_or_else(|| anyhow!("416 response without a usable Content-Range"))?;
				self.size.store(total, Ordering::Relaxed);
				return Ok(None);
			}
			StatusCode::OK => {
				// The server ignored the range header. Accepting the full
				// body would defeat random access over large archives.
				match response.content_length() {
					Some(length) if length == range.length => (),
					_ => bail!(
						"server for '{}' does not honor range requests (got 200 instead of 206)",
						self.url
					),
				}
			}
			status => bail!("expected HTTP 206 (Partial Content), got {status}"),
		}

		let etag = header_string(&response, header::ETAG).map(|v| strong_etag(&v));
		let cache_control = header_string(&response, header::CACHE_CONTROL);
		let expires = header_string(&response, header::EXPIRES);

		let bytes = response.bytes().await?;
		Ok(Some(RangeResponse {
			blob: Blob::from(&*bytes),
			etag,
			cache_control,
			expires,
		}))
	}
}

/// Network hiccups worth another request: anything in the chain where
/// reqwest reports a connect, timeout or body-stream problem. Protocol
/// violations (bad status, malformed Content-Range) are not among them.
fn is_transient(err: &anyhow::Error) -> bool {
	err.chain().any(|cause| {
		cause
			.downcast_ref::<reqwest::Error>()
			.is_some_and(|e| e.is_connect() || e.is_timeout() || e.is_body())
	})
}

#[async_trait]
impl DataReaderTrait for DataReaderHttp {
	async fn read_range(&self, range: &ByteRange) -> Result<RangeResponse> {
		let mut failures = 0u32;
		loop {
			match self.fetch_once(range).await {
				Ok(Some(response)) => return Ok(response),
				Ok(None) => {
					// Size was just corrected; no pause needed, but a server
					// that keeps answering 416 must not trap us here.
					failures += 1;
					if failures > GIVE_UP_AFTER {
						bail!("range {range:?} stays unsatisfiable; archive is {} bytes", self.size());
					}
				}
				Err(err) if failures < GIVE_UP_AFTER && is_transient(&err) => {
					failures += 1;
					let pause = Duration::from_millis(250 << failures);
					log::warn!(
						"transient failure reading {range:?} from '{}' ({failures} of {GIVE_UP_AFTER}), pausing {pause:?}: {err:#}",
						self.url
					);
					sleep(pause).await;
				}
				Err(err) => return Err(err),
			}
		}
	}

	fn size(&self) -> u64 {
		self.size.load(Ordering::Relaxed)
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn invalidate(&self) {
		self.must_reload.store(true, Ordering::Relaxed);
	}
}
