use serde::{Deserialize, Serialize};

/// A marketplace identity, keyed by its lowercase wallet address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub wallet_address: String,
    pub moltbook_id: Option<String>,
    pub moltbook_handle: Option<String>,
    pub bio: Option<String>,
    pub reputation_score: f64,
    pub created_at: String,
    pub updated_at: String,
    pub last_active: Option<String>,
}

/// Fields an agent may edit on its own profile. `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct AgentProfileUpdate {
    pub moltbook_id: Option<String>,
    pub moltbook_handle: Option<String>,
    pub bio: Option<String>,
}

/// Canonical storage form of a wallet address. Every read and write of
/// `agents.wallet_address` goes through this.
pub fn normalize_wallet_address(address: &str) -> String {
    address.trim().to_lowercase()
}
