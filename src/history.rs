//! History Iterator: cursor-paginated fetch over the history REST endpoint.
//!
//! `get_history` issues a single cursor-paginated GET; `HistoryIterator`
//! wraps repeated calls to it behind a mutable cursor and an `exhausted`
//! flag.

use crate::{channel::Channel, error::Error, grant, message::MessageBody, options::ClientOptions, topic::TopicBuf};

/// Pagination direction for [`get_history`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
	Forward,
	Backward,
}

impl Direction {
	fn as_query_value(self) -> &'static str {
		match self {
			Self::Forward => "forward",
			Self::Backward => "backward",
		}
	}
}

/// Request parameters for a single [`get_history`] call.
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
	pub cursor: Option<String>,
	pub limit: Option<u32>,
	pub direction: Option<Direction>,
}

/// A single page of history results.
#[derive(Clone, Debug)]
pub struct HistoryPage {
	pub items: Vec<MessageBody>,
	pub next_cursor: Option<String>,
}

#[derive(serde::Deserialize)]
struct HistoryResponse {
	items: Vec<MessageBody>,
	#[serde(rename = "nextCursor")]
	next_cursor: Option<String>,
}

/// Fetches one page of history for `topic`.
pub async fn get_history(
	http: &reqwest::Client,
	options: &ClientOptions,
	channel: &Channel,
	topic: &TopicBuf,
	query: &HistoryQuery,
) -> Result<HistoryPage, Error> {
	let grant = grant::obtain_grant(
		http,
		&options.auth_base_url,
		channel,
		options.token_provider.as_ref(),
		options.grant_cache.as_deref(),
		options.enable_caching,
	)
	.await?;

	let url = format!("{}/v1/pubsub/topics/{}/history", options.http_base(), topic.as_str());
	let mut request = http.get(&url).query(&[("grant", grant.as_str())]);
	if let Some(cursor) = &query.cursor {
		request = request.query(&[("cursor", cursor.as_str())]);
	}
	if let Some(limit) = query.limit {
		request = request.query(&[("limit", limit)]);
	}
	if let Some(direction) = query.direction {
		request = request.query(&[("direction", direction.as_query_value())]);
	}

	let response = request.send().await.map_err(|error| Error::Transport(error.to_string()))?;
	let status = response.status();
	if status.as_u16() == 401 || status.as_u16() == 403 {
		let body = response.text().await.unwrap_or_default();
		return Err(Error::Auth { status: status.as_u16(), body });
	}
	if !status.is_success() {
		return Err(Error::Transport(format!("history request failed with status {status}")));
	}

	let body: HistoryResponse = response.json().await.map_err(|error| Error::Decode(error.to_string()))?;
	Ok(HistoryPage {
		items: body.items,
		next_cursor: body.next_cursor,
	})
}

/// One batch returned by [`HistoryIterator::next`].
#[derive(Clone, Debug)]
pub struct HistoryBatch {
	pub items: Vec<MessageBody>,
	pub has_more: bool,
}

/// Stateful cursor over a topic's history. Once exhausted, every
/// subsequent call to [`Self::next`] returns `None`.
pub struct HistoryIterator<'a> {
	http: &'a reqwest::Client,
	options: &'a ClientOptions,
	channel: Channel,
	topic: TopicBuf,
	limit: Option<u32>,
	direction: Option<Direction>,
	cursor: Option<String>,
	exhausted: bool,
}

impl<'a> HistoryIterator<'a> {
	pub fn new(http: &'a reqwest::Client, options: &'a ClientOptions, channel: Channel, topic: TopicBuf, query: HistoryQuery) -> Self {
		Self {
			http,
			options,
			channel,
			topic,
			limit: query.limit,
			direction: query.direction,
			cursor: query.cursor,
			exhausted: false,
		}
	}

	/// Fetches the next batch, or `None` once exhausted.
	pub async fn next(&mut self) -> Option<Result<HistoryBatch, Error>> {
		if self.exhausted {
			return None;
		}

		let query = HistoryQuery {
			cursor: self.cursor.clone(),
			limit: self.limit,
			direction: self.direction,
		};
		match get_history(self.http, self.options, &self.channel, &self.topic, &query).await {
			Ok(page) => {
				self.cursor = page.next_cursor.clone();
				self.exhausted = page.next_cursor.is_none();
				Some(Ok(HistoryBatch {
					items: page.items,
					has_more: !self.exhausted,
				}))
			}
			Err(error) => {
				// A failed fetch does not exhaust the iterator: the caller
				// may retry `next()` with the same cursor.
				Some(Err(error))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::grant::StaticToken;
	use std::sync::Arc;
	use tokio::{
		io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
		net::{TcpListener, TcpStream},
	};

	#[test]
	fn direction_query_values_match_wire_format() {
		assert_eq!(Direction::Forward.as_query_value(), "forward");
		assert_eq!(Direction::Backward.as_query_value(), "backward");
	}

	fn query_param<'a>(path: &'a str, key: &str) -> Option<&'a str> {
		let query = path.split_once('?')?.1;
		query.split('&').find_map(|pair| {
			let (k, v) = pair.split_once('=')?;
			(k == key).then_some(v)
		})
	}

	/// Serves the grant endpoint unconditionally and a fake, stateless
	/// paginated history endpoint over a set of 15 messages for topic `T2`,
	/// handing back 5 at a time in descending `seq` order.
	async fn handle_connection(mut stream: TcpStream) {
		let (reader, mut writer) = stream.split();
		let mut reader = BufReader::new(reader);
		let mut request_line = String::new();
		if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
			return;
		}
		loop {
			let mut line = String::new();
			let n = reader.read_line(&mut line).await.unwrap_or(0);
			if n == 0 || line == "\r\n" {
				break;
			}
		}

		let path = request_line.split_whitespace().nth(1).unwrap_or("/");
		let body = if path.starts_with("/api/erebus/pubsub/grant") {
			serde_json::json!({ "grant_jwt": "test-grant" }).to_string()
		} else {
			let remaining: usize = query_param(path, "cursor").and_then(|c| c.parse().ok()).unwrap_or(15);
			let limit: usize = query_param(path, "limit").and_then(|c| c.parse().ok()).unwrap_or(5);
			let take = limit.min(remaining);
			let items: Vec<_> = (0..take)
				.map(|i| {
					let seq = remaining - i;
					serde_json::json!({
						"id": format!("m{seq}"),
						"topic": "T2",
						"senderId": "server",
						"seq": format!("{seq:05}"),
						"sentAt": seq as i64,
						"payload": format!("payload-{seq}"),
						"clientMsgId": format!("c{seq}"),
						"clientPublishTs": seq as i64,
					})
				})
				.collect();
			let next_remaining = remaining - take;
			let next_cursor = if next_remaining > 0 {
				serde_json::json!(next_remaining.to_string())
			} else {
				serde_json::Value::Null
			};
			serde_json::json!({ "items": items, "nextCursor": next_cursor }).to_string()
		};

		let response = format!(
			"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
			body.len(),
			body
		);
		let _ = writer.write_all(response.as_bytes()).await;
		let _ = writer.shutdown().await;
	}

	#[tokio::test]
	async fn history_iterator_paginates_backward_through_fifteen_messages() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			loop {
				let Ok((stream, _)) = listener.accept().await else {
					break;
				};
				tokio::spawn(handle_connection(stream));
			}
		});

		let base = format!("http://{addr}");
		let mut options = ClientOptions::new("ws://unused", base, Arc::new(StaticToken("tok".into())));
		options.enable_caching = false;
		let http = reqwest::Client::new();
		let channel = Channel::new("history-test-channel").unwrap();
		let topic = TopicBuf::new("T2").unwrap();

		let mut iterator = HistoryIterator::new(
			&http,
			&options,
			channel,
			topic,
			HistoryQuery {
				cursor: None,
				limit: Some(5),
				direction: Some(Direction::Backward),
			},
		);

		let mut all_seqs = Vec::new();
		let mut batch_count = 0;
		while let Some(result) = iterator.next().await {
			let batch = result.unwrap();
			assert!(!batch.items.is_empty());
			all_seqs.extend(batch.items.iter().map(|m| m.seq.clone()));
			batch_count += 1;
		}

		assert_eq!(batch_count, 3);
		assert_eq!(all_seqs.len(), 15);
		let mut sorted_desc = all_seqs.clone();
		sorted_desc.sort();
		sorted_desc.reverse();
		assert_eq!(all_seqs, sorted_desc, "seq must strictly decrease across the full iteration");

		server.abort();
	}
}
