use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(rename = "t")]
    pub message_id: ByteBuf,

    #[serde(rename = "i")]
    pub node_id: ByteBuf,

    #[serde(rename = "v")]
    pub version: i64,

    #[serde(default)]
    #[serde(rename = "fw")]
    pub firewalled: Option<i64>,

    #[serde(flatten)]
    pub variant: DHTMessageVariant,

    #[serde(default)]
    #[serde(rename = "sig", skip_serializing_if = "Option::is_none")]
    pub signature: Option<ByteBuf>,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum DHTMessageVariant {
    #[serde(rename = "q")]
    Request(DHTRequestSpecific),

    #[serde(rename = "r")]
    Response(DHTResponseSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum DHTRequestSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: DHTPingRequestArguments,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "a")]
        arguments: DHTFindNodeRequestArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "a")]
        arguments: DHTFindValueRequestArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "a")]
        arguments: DHTStoreRequestArguments,
    },

    #[serde(rename = "stats")]
    Stats {
        #[serde(rename = "a")]
        arguments: DHTStatsRequestArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum DHTResponseSpecific {
    #[serde(rename = "pong")]
    Pong {
        #[serde(rename = "r")]
        arguments: DHTPingResponseArguments,
    },

    #[serde(rename = "find_node")]
    FindNode {
        #[serde(rename = "r")]
        arguments: DHTFindNodeResponseArguments,
    },

    #[serde(rename = "find_value")]
    FindValue {
        #[serde(rename = "r")]
        arguments: DHTFindValueResponseArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "r")]
        arguments: DHTStoreResponseArguments,
    },

    #[serde(rename = "stats")]
    Stats {
        #[serde(rename = "r")]
        arguments: DHTStatsResponseArguments,
    },
}

// === PING ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTPingRequestArguments {}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTPingResponseArguments {
    #[serde(rename = "ip")]
    pub external_address: ByteBuf,

    #[serde(rename = "size")]
    pub estimated_size: i64,
}

// === FIND_NODE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTFindNodeRequestArguments {
    pub target: ByteBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTFindNodeResponseArguments {
    pub token: ByteBuf,
    pub nodes: Vec<ByteBuf>,
}

// === FIND_VALUE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTFindValueRequestArguments {
    pub target: ByteBuf,
    pub keys: Vec<ByteBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTFindValueResponseArguments {
    pub values: Vec<ByteBuf>,
    pub keys: Vec<ByteBuf>,
}

// === STORE ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStoreRequestArguments {
    pub token: ByteBuf,
    pub values: Vec<ByteBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStoreResponseArguments {
    pub stored: Vec<ByteBuf>,
}

// === STATS ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStatsRequestArguments {
    pub kind: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTStatsResponseArguments {
    pub statistics: ByteBuf,
}
