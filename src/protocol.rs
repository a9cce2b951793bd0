//! Wire protocol: request parsing and response encoding.
//!
//! Requests are line oriented and loosely HTTP/1.1 shaped; the verb is the
//! first three bytes, the `User-Agent` header carries the peer's id and
//! Lamport clock, and a `PUT` body is the JSON object starting at the first
//! `{` line. Responses are a single JSON object written back on the same
//! socket, which is then closed.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::Record;

/// successful push to an existing document, or successful fetch
pub const STATUS_OK: u16 = 200;
/// first successful push after the document was created
pub const STATUS_CREATED: u16 = 201;
/// push without a body
pub const STATUS_NO_CONTENT: u16 = 204;
/// malformed header, unknown verb, invalid JSON or empty id
pub const STATUS_BAD_REQUEST: u16 = 400;
/// fetch for an unknown station
pub const STATUS_NOT_FOUND: u16 = 404;
/// internal error, including a persistently uncreatable document
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// canonical success message
pub const MSG_OK: &str = "ok.";
/// canonical message for the document-creating push
pub const MSG_CREATED: &str = "Put weather data success and file has created.";
/// canonical message for a bodyless push
pub const MSG_NO_CONTENT: &str = "No json data to process!";
/// canonical message for a fetch miss
pub const MSG_NOT_FOUND: &str = "Not found.";
/// canonical message for internal failures
pub const MSG_SERVER_ERROR: &str = "Internal server error.";

const KEY_USER_AGENT: &str = "User-Agent";
const METHOD_PUT: &str = "PUT";
const METHOD_GET: &str = "GET";

/// The response written back for every request.
///
/// `weather_data` is present only on a successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// status code, mirroring the HTTP table
    pub status_code: u16,
    /// human readable outcome
    pub msg: String,
    /// the server's Lamport clock when the response was composed
    pub lamport_clock: u64,
    /// the fetched record, on a fetch hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_data: Option<Record>,
}

impl Response {
    /// builds a response without a record payload
    pub fn new(status_code: u16, msg: impl Into<String>, lamport_clock: u64) -> Self {
        Response {
            status_code,
            msg: msg.into(),
            lamport_clock,
            weather_data: None,
        }
    }

    /// attaches the fetched record
    pub fn with_record(mut self, record: Record) -> Self {
        self.weather_data = Some(record);
        self
    }
}

/// Outcome of parsing one request; total over all inputs.
///
/// Malformed input becomes a `Reject` carrying the status the worker will
/// answer with, so a parse failure never escapes as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRequest {
    /// a producer push
    Push {
        /// id the producer reports under
        producer_id: String,
        /// the pushed record
        record: Record,
        /// clock value carried by the request
        lamport: u64,
    },
    /// a reader fetch
    Fetch {
        /// station id to look up
        id: String,
        /// clock value carried by the request
        lamport: u64,
    },
    /// a refused request
    Reject {
        /// message for the client
        reason: String,
        /// status code to answer with
        status: u16,
        /// clock value carried by the request, when one could be parsed
        lamport: u64,
    },
}

/// Parses one request per the wire rules.
pub fn parse_request(raw: &str) -> ParsedRequest {
    match raw.get(..3) {
        Some(METHOD_PUT) => parse_push(raw),
        Some(METHOD_GET) => parse_fetch(raw),
        _ => ParsedRequest::Reject {
            reason: "Method not allowed. Allow: PUT, GET".to_string(),
            status: STATUS_BAD_REQUEST,
            lamport: 0,
        },
    }
}

// id and Lamport value from the User-Agent line: whitespace separated,
// fields [2] and [3]. A missing line yields an empty id, which a fetch
// simply misses on; a present but short or unparsable line is refused.
fn parse_user_agent(raw: &str) -> std::result::Result<(String, u64), ParsedRequest> {
    for line in raw.lines() {
        if !line.contains(KEY_USER_AGENT) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(ParsedRequest::Reject {
                reason: "Invalid user-agent in header!".to_string(),
                status: STATUS_BAD_REQUEST,
                lamport: 0,
            });
        }
        let lamport = match fields[3].parse::<u64>() {
            Ok(lamport) => lamport,
            Err(_) => {
                return Err(ParsedRequest::Reject {
                    reason: "Invalid lamport clock in header!".to_string(),
                    status: STATUS_BAD_REQUEST,
                    lamport: 0,
                })
            }
        };
        return Ok((fields[2].to_string(), lamport));
    }
    Ok((String::new(), 0))
}

fn parse_push(raw: &str) -> ParsedRequest {
    let (producer_id, lamport) = match parse_user_agent(raw) {
        Ok(parsed) => parsed,
        Err(reject) => return reject,
    };

    // the body is every line from the first `{` line to the end of message
    let mut body = String::new();
    let mut in_body = false;
    for line in raw.lines() {
        if !in_body && line.starts_with('{') {
            in_body = true;
        }
        if in_body {
            body.push_str(line);
        }
    }

    if body.is_empty() {
        return ParsedRequest::Reject {
            reason: MSG_NO_CONTENT.to_string(),
            status: STATUS_NO_CONTENT,
            lamport,
        };
    }

    let record = match Record::from_json(&body) {
        Ok(record) => record,
        Err(_) => {
            return ParsedRequest::Reject {
                reason: "Invalid json data!".to_string(),
                status: STATUS_BAD_REQUEST,
                lamport,
            }
        }
    };
    if record.require_id().is_err() {
        return ParsedRequest::Reject {
            reason: "Invalid weather data: missing ID".to_string(),
            status: STATUS_BAD_REQUEST,
            lamport,
        };
    }

    ParsedRequest::Push {
        producer_id,
        record,
        lamport,
    }
}

fn parse_fetch(raw: &str) -> ParsedRequest {
    match parse_user_agent(raw) {
        Ok((id, lamport)) => ParsedRequest::Fetch { id, lamport },
        Err(reject) => reject,
    }
}

/// Encodes a producer push request.
pub fn encode_push(agent: &str, producer_id: &str, lamport: u64, record: &Record) -> Result<String> {
    let body = serde_json::to_string(record)?;
    Ok(format!(
        "PUT /weather.json HTTP/1.1\n\
         User-Agent: {} {} {}\n\
         Content-Type: application/json\n\
         Content-Length: {}\n\
         \n\
         {}",
        agent,
        producer_id,
        lamport,
        body.len(),
        body
    ))
}

/// Encodes a reader fetch request.
pub fn encode_fetch(agent: &str, id: &str, lamport: u64) -> String {
    format!("GET HTTP/1.1\nUser-Agent: {} {} {}\n", agent, id, lamport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_verb_is_refused() {
        let parsed = parse_request("FOO demo HTTP/1.1\n");
        assert!(matches!(
            parsed,
            ParsedRequest::Reject {
                status: STATUS_BAD_REQUEST,
                ..
            }
        ));
    }

    #[test]
    fn bodyless_put_is_no_content() {
        let raw = "PUT /weather.json HTTP/1.1\n\
                   User-Agent: producer/1 cs-1 3\n\
                   Content-Type: application/json\n\
                   Content-Length: 100\n";
        assert_eq!(
            parse_request(raw),
            ParsedRequest::Reject {
                reason: MSG_NO_CONTENT.to_string(),
                status: STATUS_NO_CONTENT,
                lamport: 3,
            }
        );
    }

    #[test]
    fn short_user_agent_is_refused() {
        let raw = "GET HTTP/1.1\nUser-Agent: reader/1 IDS60901\n";
        assert!(matches!(
            parse_request(raw),
            ParsedRequest::Reject {
                status: STATUS_BAD_REQUEST,
                ..
            }
        ));
    }

    #[test]
    fn unparsable_lamport_is_refused() {
        let raw = "GET HTTP/1.1\nUser-Agent: reader/1 IDS60901 soon\n";
        assert!(matches!(
            parse_request(raw),
            ParsedRequest::Reject {
                status: STATUS_BAD_REQUEST,
                ..
            }
        ));
    }

    #[test]
    fn fetch_carries_id_and_lamport() {
        let raw = "GET HTTP/1.1\nUser-Agent: reader/1 IDS60901 12\n";
        assert_eq!(
            parse_request(raw),
            ParsedRequest::Fetch {
                id: "IDS60901".to_string(),
                lamport: 12,
            }
        );
    }

    #[test]
    fn push_round_trips_through_the_encoder() {
        let record = Record::from_json(r#"{"id":"IDS60901","air_temp":13.3}"#).unwrap();
        let raw = encode_push("producer/1", "cs-1", 7, &record).unwrap();
        match parse_request(&raw) {
            ParsedRequest::Push {
                producer_id,
                record: parsed,
                lamport,
            } => {
                assert_eq!(producer_id, "cs-1");
                assert_eq!(lamport, 7);
                assert_eq!(parsed, record);
            }
            other => panic!("expected push, got {:?}", other),
        }
    }

    #[test]
    fn multi_line_body_is_concatenated() {
        let raw = "PUT /weather.json HTTP/1.1\n\
                   User-Agent: producer/1 cs-1 2\n\
                   Content-Type: application/json\n\
                   \n\
                   {\"id\":\"IDS60901\",\n\"air_temp\":13.3}\n";
        match parse_request(raw) {
            ParsedRequest::Push { record, .. } => {
                assert_eq!(record.id(), Some("IDS60901"));
            }
            other => panic!("expected push, got {:?}", other),
        }
    }

    #[test]
    fn invalid_body_is_refused() {
        let raw = "PUT /weather.json HTTP/1.1\n\
                   User-Agent: producer/1 cs-1 2\n\
                   \n\
                   {not json\n";
        assert!(matches!(
            parse_request(raw),
            ParsedRequest::Reject {
                status: STATUS_BAD_REQUEST,
                ..
            }
        ));
    }

    #[test]
    fn missing_id_is_refused() {
        let raw = "PUT /weather.json HTTP/1.1\n\
                   User-Agent: producer/1 cs-1 2\n\
                   \n\
                   {\"air_temp\":13.3}\n";
        assert!(matches!(
            parse_request(raw),
            ParsedRequest::Reject {
                status: STATUS_BAD_REQUEST,
                ..
            }
        ));
    }

    #[test]
    fn response_uses_the_wire_key_spelling() {
        let response = Response::new(STATUS_OK, MSG_OK, 4);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"statusCode\":200"));
        assert!(json.contains("\"lamportClock\":4"));
        assert!(!json.contains("weatherData"));

        let record = Record::from_json(r#"{"id":"IDS60901"}"#).unwrap();
        let json = serde_json::to_string(&Response::new(STATUS_OK, MSG_OK, 4).with_record(record))
            .unwrap();
        assert!(json.contains("\"weatherData\""));
    }
}
