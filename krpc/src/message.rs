use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// `port`/`implied_port` arrive as either a bencoded integer or a bencoded
/// string: some clients in the wild stringify them. We accept both on
/// decode and always emit an integer on encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortValue(pub i64);

impl From<u16> for PortValue {
    fn from(v: u16) -> Self {
        PortValue(v as i64)
    }
}

impl PortValue {
    pub fn as_u16(&self) -> Option<u16> {
        u16::try_from(self.0).ok()
    }
}

impl Serialize for PortValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for PortValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Str(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(PortValue(v)),
            Repr::Str(s) => s
                .parse::<i64>()
                .map(PortValue)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// The four query methods this overlay understands.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "q", content = "a")]
pub enum Query {
    #[serde(rename = "ping")]
    Ping { id: ByteBuf },

    #[serde(rename = "find_node")]
    FindNode { id: ByteBuf, target: ByteBuf },

    #[serde(rename = "get_peers")]
    GetPeers {
        id: ByteBuf,
        info_hash: ByteBuf,
    },

    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        id: ByteBuf,
        info_hash: ByteBuf,
        port: PortValue,
        implied_port: PortValue,
        token: ByteBuf,
    },
}

impl Query {
    pub fn method(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
        }
    }

    /// Every query carries the sender's own id; useful to callers that
    /// just want to learn about / refresh the querying contact.
    pub fn sender_id(&self) -> &ByteBuf {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => id,
        }
    }
}

/// A response body. Only two concrete shapes are ever emitted (`pong` and
/// the two result variants); on decode we also keep a catch-all so
/// forward-compatible fields don't trip a hard failure.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Response {
    pub id: ByteBuf,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<ByteBuf>,
    /// Compact contact stream, present on `find_node`/`get_peers` "next
    /// hop" replies.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nodes: Option<ByteBuf>,
    /// Compact peer entries, present on a `get_peers` hit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub values: Option<Vec<ByteBuf>>,
}

/// A KRPC envelope: the `t`/`y` common header plus one of query, response,
/// or error body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "t")]
    pub txid: ByteBuf,
    #[serde(flatten)]
    pub body: Body,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "y")]
pub enum Body {
    #[serde(rename = "q")]
    Query {
        #[serde(flatten)]
        query: Query,
    },
    #[serde(rename = "r")]
    Response { r: Response },
    #[serde(rename = "e")]
    Error { e: (i64, String) },
}

impl Envelope {
    pub fn ping_query(txid: Vec<u8>, id: [u8; 20]) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Query { query: Query::Ping { id: ByteBuf::from(id.to_vec()) } },
        }
    }

    pub fn find_node_query(txid: Vec<u8>, id: [u8; 20], target: [u8; 20]) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Query {
                query: Query::FindNode {
                    id: ByteBuf::from(id.to_vec()),
                    target: ByteBuf::from(target.to_vec()),
                },
            },
        }
    }

    pub fn get_peers_query(txid: Vec<u8>, id: [u8; 20], info_hash: [u8; 20]) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Query {
                query: Query::GetPeers {
                    id: ByteBuf::from(id.to_vec()),
                    info_hash: ByteBuf::from(info_hash.to_vec()),
                },
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn announce_peer_query(
        txid: Vec<u8>,
        id: [u8; 20],
        info_hash: [u8; 20],
        port: u16,
        implied_port: bool,
        token: Vec<u8>,
    ) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Query {
                query: Query::AnnouncePeer {
                    id: ByteBuf::from(id.to_vec()),
                    info_hash: ByteBuf::from(info_hash.to_vec()),
                    port: PortValue(port as i64),
                    implied_port: PortValue(if implied_port { 1 } else { 0 }),
                    token: ByteBuf::from(token),
                },
            },
        }
    }

    /// The `pong` shape: also used as the ack for `announce_peer`.
    pub fn pong_response(txid: Vec<u8>, id: [u8; 20]) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Response {
                r: Response { id: ByteBuf::from(id.to_vec()), token: None, nodes: None, values: None },
            },
        }
    }

    pub fn node_result(txid: Vec<u8>, id: [u8; 20], token: Option<Vec<u8>>, nodes: Vec<u8>) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Response {
                r: Response {
                    id: ByteBuf::from(id.to_vec()),
                    token: token.map(ByteBuf::from),
                    nodes: Some(ByteBuf::from(nodes)),
                    values: None,
                },
            },
        }
    }

    pub fn peer_result(txid: Vec<u8>, id: [u8; 20], token: Vec<u8>, values: Vec<Vec<u8>>) -> Self {
        Envelope {
            txid: ByteBuf::from(txid),
            body: Body::Response {
                r: Response {
                    id: ByteBuf::from(id.to_vec()),
                    token: Some(ByteBuf::from(token)),
                    nodes: None,
                    values: Some(values.into_iter().map(ByteBuf::from).collect()),
                },
            },
        }
    }

    pub fn error(txid: Vec<u8>, code: i64, message: impl Into<String>) -> Self {
        Envelope { txid: ByteBuf::from(txid), body: Body::Error { e: (code, message.into()) } }
    }

    pub fn is_query(&self) -> bool {
        matches!(self.body, Body::Query { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.body, Body::Response { .. })
    }
}
