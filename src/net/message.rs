//! Datagram and stream wire frames.
//!
//! Text protocol: whitespace-separated tokens, verb first, frame ≤ 1024
//! bytes (spec §6). Grounded on the teacher's `command()`/tag-dispatch style
//! in `net/message.rs`, adapted from a `postcard`-serialized binary `Message`
//! enum to the spec's plain-text frames — the exact tokenization (treat the
//! last token of `LOOKING_FOR` as `max_price`, everything between `item` and
//! it as the description) follows `examples/original_source/server.py`'s
//! `message.split()` handling.

use std::fmt;
use uuid::Uuid;

use crate::error::FrameError;

/// Maximum size of an inbound datagram frame (spec §4.1, §6).
pub const MAX_FRAME_BYTES: usize = 1024;

/// Frames sent by a peer to the coordinator over UDP.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Register {
        rq: Uuid,
        name: String,
        claimed_host: String,
        udp_port: u16,
        stream_port: u16,
    },
    Deregister {
        rq: Uuid,
        name: String,
    },
    LookingFor {
        rq: Uuid,
        buyer: String,
        item: String,
        description: String,
        max_price: f64,
    },
    Offer {
        rq: Uuid,
        seller: String,
        item: String,
        price: f64,
    },
    Accept {
        rq: Uuid,
        item: String,
        price: f64,
    },
    Refuse {
        rq: Uuid,
        item: String,
        price: f64,
    },
    Buy {
        rq: Uuid,
        item: String,
        price: f64,
    },
    Cancel {
        rq: Uuid,
        item: String,
        price: f64,
    },
}

impl ClientFrame {
    /// Verb token, used for logging and for `TooFewTokens` diagnostics.
    pub fn verb(&self) -> &'static str {
        match self {
            ClientFrame::Register { .. } => "REGISTER",
            ClientFrame::Deregister { .. } => "DE-REGISTER",
            ClientFrame::LookingFor { .. } => "LOOKING_FOR",
            ClientFrame::Offer { .. } => "OFFER",
            ClientFrame::Accept { .. } => "ACCEPT",
            ClientFrame::Refuse { .. } => "REFUSE",
            ClientFrame::Buy { .. } => "BUY",
            ClientFrame::Cancel { .. } => "CANCEL",
        }
    }

    pub fn rq(&self) -> Uuid {
        match self {
            ClientFrame::Register { rq, .. }
            | ClientFrame::Deregister { rq, .. }
            | ClientFrame::LookingFor { rq, .. }
            | ClientFrame::Offer { rq, .. }
            | ClientFrame::Accept { rq, .. }
            | ClientFrame::Refuse { rq, .. }
            | ClientFrame::Buy { rq, .. }
            | ClientFrame::Cancel { rq, .. } => *rq,
        }
    }
}

impl fmt::Display for ClientFrame {
    /// Renders the wire form a peer participant sends to the coordinator —
    /// the mirror image of [`parse_client_frame`], used by
    /// [`crate::peer_kit`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientFrame::Register { rq, name, claimed_host, udp_port, stream_port } => {
                write!(f, "REGISTER {rq} {name} {claimed_host} {udp_port} {stream_port}")
            }
            ClientFrame::Deregister { rq, name } => write!(f, "DE-REGISTER {rq} {name}"),
            ClientFrame::LookingFor { rq, buyer, item, description, max_price } => {
                write!(f, "LOOKING_FOR {rq} {buyer} {item} {description} {max_price}")
            }
            ClientFrame::Offer { rq, seller, item, price } => {
                write!(f, "OFFER {rq} {seller} {item} {price}")
            }
            ClientFrame::Accept { rq, item, price } => write!(f, "ACCEPT {rq} {item} {price}"),
            ClientFrame::Refuse { rq, item, price } => write!(f, "REFUSE {rq} {item} {price}"),
            ClientFrame::Buy { rq, item, price } => write!(f, "BUY {rq} {item} {price}"),
            ClientFrame::Cancel { rq, item, price } => write!(f, "CANCEL {rq} {item} {price}"),
        }
    }
}

/// Parse one inbound datagram into a [`ClientFrame`].
///
/// Unknown verbs and malformed frames return a [`FrameError`]; the caller
/// (the dispatch boundary in [`crate::net::endpoint`]) logs and drops them —
/// this function never emits a negative acknowledgement itself (spec §7).
pub fn parse_client_frame(raw: &[u8]) -> Result<ClientFrame, FrameError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge { limit: MAX_FRAME_BYTES });
    }
    let text = String::from_utf8_lossy(raw);
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let verb = *tokens.first().ok_or(FrameError::Empty)?;

    match verb {
        "REGISTER" => {
            require_tokens(verb_name(verb), &tokens, 6)?;
            Ok(ClientFrame::Register {
                rq: parse_uuid(tokens[1])?,
                name: tokens[2].to_string(),
                claimed_host: tokens[3].to_string(),
                udp_port: parse_port(tokens[4])?,
                stream_port: parse_port(tokens[5])?,
            })
        }
        "DE-REGISTER" => {
            require_tokens(verb_name(verb), &tokens, 3)?;
            Ok(ClientFrame::Deregister {
                rq: parse_uuid(tokens[1])?,
                name: tokens[2].to_string(),
            })
        }
        "LOOKING_FOR" => {
            require_tokens(verb_name(verb), &tokens, 5)?;
            let buyer = tokens[2].to_string();
            let item = tokens[3].to_string();
            let max_price = parse_price(tokens[tokens.len() - 1])?;
            let description = tokens[4..tokens.len() - 1].join(" ");
            Ok(ClientFrame::LookingFor {
                rq: parse_uuid(tokens[1])?,
                buyer,
                item,
                description,
                max_price,
            })
        }
        "OFFER" => {
            require_tokens(verb_name(verb), &tokens, 5)?;
            Ok(ClientFrame::Offer {
                rq: parse_uuid(tokens[1])?,
                seller: tokens[2].to_string(),
                item: tokens[3].to_string(),
                price: parse_price(tokens[4])?,
            })
        }
        "ACCEPT" => {
            require_tokens(verb_name(verb), &tokens, 4)?;
            Ok(ClientFrame::Accept {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
            })
        }
        "REFUSE" => {
            require_tokens(verb_name(verb), &tokens, 4)?;
            Ok(ClientFrame::Refuse {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
            })
        }
        "BUY" => {
            require_tokens(verb_name(verb), &tokens, 4)?;
            Ok(ClientFrame::Buy {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
            })
        }
        "CANCEL" => {
            require_tokens(verb_name(verb), &tokens, 4)?;
            Ok(ClientFrame::Cancel {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
            })
        }
        other => Err(FrameError::UnknownVerb(other.to_string())),
    }
}

/// Leak a `&'static str` copy of a verb for error messages without
/// allocating a lookup table; verbs are a closed, small set of literals.
fn verb_name(verb: &str) -> &'static str {
    match verb {
        "REGISTER" => "REGISTER",
        "DE-REGISTER" => "DE-REGISTER",
        "LOOKING_FOR" => "LOOKING_FOR",
        "OFFER" => "OFFER",
        "ACCEPT" => "ACCEPT",
        "REFUSE" => "REFUSE",
        "BUY" => "BUY",
        "CANCEL" => "CANCEL",
        _ => "UNKNOWN",
    }
}

fn require_tokens(verb: &'static str, tokens: &[&str], expected: usize) -> Result<(), FrameError> {
    if tokens.len() < expected {
        Err(FrameError::TooFewTokens { verb, expected, actual: tokens.len() })
    } else {
        Ok(())
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, FrameError> {
    Uuid::parse_str(s).map_err(|_| FrameError::InvalidRequestId(s.to_string()))
}

fn parse_price(s: &str) -> Result<f64, FrameError> {
    s.parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
        .ok_or_else(|| FrameError::InvalidPrice(s.to_string()))
}

fn parse_port(s: &str) -> Result<u16, FrameError> {
    s.parse::<u16>().map_err(|_| FrameError::InvalidPort(s.to_string()))
}

/// Frames sent by the coordinator to a peer over UDP.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Registered { rq: Uuid },
    RegisterDenied { rq: Uuid, reason: String },
    Deregistered { rq: Uuid },
    DeregisterDenied { rq: Uuid, reason: String },
    Search { rq: Uuid, item: String, description: String },
    Found { rq: Uuid, item: String, price: f64, seller: String },
    NotAvailable { rq: Uuid, item: String, max_price: f64 },
    Reserve { rq: Uuid, item: String, price: f64 },
    Negotiate { rq: Uuid, item: String, max_price: f64 },
    NotFound { rq: Uuid, item: String, max_price: f64 },
    Cancel { rq: Uuid, item: String, price: f64 },
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFrame::Registered { rq } => write!(f, "REGISTERED {rq}"),
            ServerFrame::RegisterDenied { rq, reason } => {
                write!(f, "REGISTER-DENIED {rq} {reason}")
            }
            ServerFrame::Deregistered { rq } => write!(f, "DE-REGISTERED {rq}"),
            ServerFrame::DeregisterDenied { rq, reason } => {
                write!(f, "DE-REGISTER-DENIED {rq} {reason}")
            }
            ServerFrame::Search { rq, item, description } => {
                write!(f, "SEARCH {rq} {item} {description}")
            }
            ServerFrame::Found { rq, item, price, seller } => {
                write!(f, "FOUND {rq} {item} {price} from {seller}")
            }
            ServerFrame::NotAvailable { rq, item, max_price } => {
                write!(f, "NOT_AVAILABLE {rq} {item} {max_price}")
            }
            ServerFrame::Reserve { rq, item, price } => {
                write!(f, "RESERVE {rq} {item} {price}")
            }
            ServerFrame::Negotiate { rq, item, max_price } => {
                write!(f, "NEGOTIATE {rq} {item} {max_price}")
            }
            ServerFrame::NotFound { rq, item, max_price } => {
                write!(f, "NOT_FOUND {rq} {item} {max_price}")
            }
            ServerFrame::Cancel { rq, item, price } => {
                write!(f, "CANCEL {rq} {item} {price}")
            }
        }
    }
}

/// Parse one datagram sent by the coordinator into a [`ServerFrame`], for
/// use by [`crate::peer_kit`]'s receive loop. Mirrors
/// [`parse_client_frame`]'s tokenization rules.
pub fn parse_server_frame(raw: &[u8]) -> Result<ServerFrame, FrameError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge { limit: MAX_FRAME_BYTES });
    }
    let text = String::from_utf8_lossy(raw);
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let verb = *tokens.first().ok_or(FrameError::Empty)?;

    match verb {
        "REGISTERED" => {
            require_tokens("REGISTERED", &tokens, 2)?;
            Ok(ServerFrame::Registered { rq: parse_uuid(tokens[1])? })
        }
        "REGISTER-DENIED" => {
            require_tokens("REGISTER-DENIED", &tokens, 3)?;
            Ok(ServerFrame::RegisterDenied { rq: parse_uuid(tokens[1])?, reason: tokens[2..].join(" ") })
        }
        "DE-REGISTERED" => {
            require_tokens("DE-REGISTERED", &tokens, 2)?;
            Ok(ServerFrame::Deregistered { rq: parse_uuid(tokens[1])? })
        }
        "DE-REGISTER-DENIED" => {
            require_tokens("DE-REGISTER-DENIED", &tokens, 3)?;
            Ok(ServerFrame::DeregisterDenied { rq: parse_uuid(tokens[1])?, reason: tokens[2..].join(" ") })
        }
        "SEARCH" => {
            require_tokens("SEARCH", &tokens, 4)?;
            Ok(ServerFrame::Search {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                description: tokens[3..].join(" "),
            })
        }
        "FOUND" => {
            // FOUND <rq> <item> <price> from <seller>
            require_tokens("FOUND", &tokens, 6)?;
            Ok(ServerFrame::Found {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
                seller: tokens[5..].join(" "),
            })
        }
        "NOT_AVAILABLE" => {
            require_tokens("NOT_AVAILABLE", &tokens, 4)?;
            Ok(ServerFrame::NotAvailable {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                max_price: parse_price(tokens[3])?,
            })
        }
        "RESERVE" => {
            require_tokens("RESERVE", &tokens, 4)?;
            Ok(ServerFrame::Reserve {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
            })
        }
        "NEGOTIATE" => {
            require_tokens("NEGOTIATE", &tokens, 4)?;
            Ok(ServerFrame::Negotiate {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                max_price: parse_price(tokens[3])?,
            })
        }
        "NOT_FOUND" => {
            require_tokens("NOT_FOUND", &tokens, 4)?;
            Ok(ServerFrame::NotFound {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                max_price: parse_price(tokens[3])?,
            })
        }
        "CANCEL" => {
            require_tokens("CANCEL", &tokens, 4)?;
            Ok(ServerFrame::Cancel {
                rq: parse_uuid(tokens[1])?,
                item: tokens[2].to_string(),
                price: parse_price(tokens[3])?,
            })
        }
        other => Err(FrameError::UnknownVerb(other.to_string())),
    }
}

/// Stream-protocol frames exchanged during a transaction (spec §4.5, §6).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    InformReq { tx: Uuid, item: String, price: f64 },
    InformRes { tx: Uuid, name: String, cc_number: String, cc_expiry: String, address: String },
    ShippingInfo { tx: Uuid, buyer_name: String, buyer_address: String },
    Cancel { tx: Uuid, reason: String },
}

impl fmt::Display for StreamFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFrame::InformReq { tx, item, price } => {
                write!(f, "INFORM_Req {tx} {item} {price}")
            }
            StreamFrame::InformRes { tx, name, cc_number, cc_expiry, address } => {
                write!(f, "INFORM_Res {tx} {name} {cc_number} {cc_expiry} {address}")
            }
            StreamFrame::ShippingInfo { tx, buyer_name, buyer_address } => {
                write!(f, "Shipping_Info {tx} {buyer_name} {buyer_address}")
            }
            StreamFrame::Cancel { tx, reason } => write!(f, "CANCEL {tx} {reason}"),
        }
    }
}

impl StreamFrame {
    /// Parse one line of the stream protocol. Unlike [`ClientFrame`] this is
    /// used only by the orchestrator's own read path and by the reference
    /// peer participant, so it tolerates any reply shape rather than
    /// dispatching on a verb table.
    pub fn parse(line: &str) -> Result<StreamFrame, FrameError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first().copied() {
            Some("INFORM_Req") => {
                require_tokens("INFORM_Req", &tokens, 4)?;
                Ok(StreamFrame::InformReq {
                    tx: parse_uuid(tokens[1])?,
                    item: tokens[2].to_string(),
                    price: parse_price(tokens[3])?,
                })
            }
            Some("INFORM_Res") => {
                require_tokens("INFORM_Res", &tokens, 6)?;
                Ok(StreamFrame::InformRes {
                    tx: parse_uuid(tokens[1])?,
                    name: tokens[2].to_string(),
                    cc_number: tokens[3].to_string(),
                    cc_expiry: tokens[4].to_string(),
                    address: tokens[5..].join(" "),
                })
            }
            Some("Shipping_Info") => {
                require_tokens("Shipping_Info", &tokens, 4)?;
                Ok(StreamFrame::ShippingInfo {
                    tx: parse_uuid(tokens[1])?,
                    buyer_name: tokens[2].to_string(),
                    buyer_address: tokens[3..].join(" "),
                })
            }
            Some("CANCEL") => {
                require_tokens("CANCEL", &tokens, 2)?;
                Ok(StreamFrame::Cancel {
                    tx: parse_uuid(tokens[1])?,
                    reason: tokens[2..].join(" "),
                })
            }
            Some(other) => Err(FrameError::UnknownVerb(other.to_string())),
            None => Err(FrameError::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rq() -> Uuid {
        Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
    }

    #[test]
    fn parses_register() {
        let frame = parse_client_frame(
            format!("REGISTER {} A localhost 6001 7001", rq()).as_bytes(),
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Register {
                rq: rq(),
                name: "A".into(),
                claimed_host: "localhost".into(),
                udp_port: 6001,
                stream_port: 7001,
            }
        );
    }

    #[test]
    fn looking_for_joins_multiword_description() {
        let frame = parse_client_frame(
            format!("LOOKING_FOR {} A book a cheap used paperback 20", rq()).as_bytes(),
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::LookingFor {
                rq: rq(),
                buyer: "A".into(),
                item: "book".into(),
                description: "a cheap used paperback".into(),
                max_price: 20.0,
            }
        );
    }

    #[test]
    fn looking_for_with_no_description_tokens() {
        let frame = parse_client_frame(format!("LOOKING_FOR {} A book 20", rq()).as_bytes())
            .unwrap();
        assert_eq!(
            frame,
            ClientFrame::LookingFor {
                rq: rq(),
                buyer: "A".into(),
                item: "book".into(),
                description: String::new(),
                max_price: 20.0,
            }
        );
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = parse_client_frame(b"PING hello").unwrap_err();
        assert_eq!(err, FrameError::UnknownVerb("PING".into()));
    }

    #[test]
    fn rejects_oversized_frame() {
        let huge = vec![b'a'; MAX_FRAME_BYTES + 1];
        assert_eq!(
            parse_client_frame(&huge).unwrap_err(),
            FrameError::TooLarge { limit: MAX_FRAME_BYTES }
        );
    }

    #[test]
    fn rejects_negative_price() {
        let err = parse_client_frame(format!("OFFER {} B book -1", rq()).as_bytes()).unwrap_err();
        assert_eq!(err, FrameError::InvalidPrice("-1".into()));
    }

    #[test]
    fn server_frame_display_matches_wire_shape() {
        let found = ServerFrame::Found { rq: rq(), item: "book".into(), price: 15.0, seller: "C".into() };
        assert_eq!(found.to_string(), format!("FOUND {} book 15 from C", rq()));
    }

    #[test]
    fn client_frame_display_matches_wire_shape() {
        let offer = ClientFrame::Offer { rq: rq(), seller: "B".into(), item: "book".into(), price: 12.0 };
        assert_eq!(offer.to_string(), format!("OFFER {} B book 12", rq()));
    }

    #[test]
    fn parse_server_frame_round_trips_found() {
        let found = ServerFrame::Found { rq: rq(), item: "book".into(), price: 15.0, seller: "C".into() };
        let parsed = parse_server_frame(found.to_string().as_bytes()).unwrap();
        assert_eq!(parsed, found);
    }

    #[test]
    fn stream_frame_round_trips_inform_res() {
        let parsed = StreamFrame::parse(&format!(
            "INFORM_Res {} A 4111111111111111 12/29 1 Market St",
            rq()
        ))
        .unwrap();
        assert_eq!(
            parsed,
            StreamFrame::InformRes {
                tx: rq(),
                name: "A".into(),
                cc_number: "4111111111111111".into(),
                cc_expiry: "12/29".into(),
                address: "1 Market St".into(),
            }
        );
    }
}
