//! Rotating client identities for index retrieval
//!
//! A [`HeaderProfile`] is a browser-like header set with a pool of user-agent
//! strings. The selector picks a profile by weight on every attempt; the
//! fetcher then picks one agent from it uniformly. Nothing is pinned across
//! attempts or cycles.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Header set presented by one kind of client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderProfile {
    pub name: String,
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// A header profile with its selection weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    #[serde(flatten)]
    pub profile: HeaderProfile,
    pub weight: u32,
}

impl ClientIdentity {
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// Pick one of the profile's user agents
    pub fn pick_user_agent(&self, rng: &mut fastrand::Rng) -> Option<&str> {
        if self.profile.user_agents.is_empty() {
            return None;
        }
        let idx = rng.usize(..self.profile.user_agents.len());
        Some(self.profile.user_agents[idx].as_str())
    }
}

/// Source of client identities, consulted once per attempt
pub trait IdentitySelector: Send + Sync {
    fn select(&self) -> ClientIdentity;
}

/// Weighted random choice over a fixed corpus
pub struct WeightedIdentitySelector {
    identities: Vec<ClientIdentity>,
    total_weight: u64,
    rng: Mutex<fastrand::Rng>,
}

impl WeightedIdentitySelector {
    pub fn new(identities: Vec<ClientIdentity>) -> anyhow::Result<Self> {
        Self::with_rng(identities, fastrand::Rng::new())
    }

    /// Deterministic selector for tests and replays
    pub fn with_seed(identities: Vec<ClientIdentity>, seed: u64) -> anyhow::Result<Self> {
        Self::with_rng(identities, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(identities: Vec<ClientIdentity>, rng: fastrand::Rng) -> anyhow::Result<Self> {
        let total_weight: u64 = identities.iter().map(|i| u64::from(i.weight)).sum();
        if total_weight == 0 {
            anyhow::bail!("identity corpus must contain at least one positive weight");
        }
        Ok(Self {
            identities,
            total_weight,
            rng: Mutex::new(rng),
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl IdentitySelector for WeightedIdentitySelector {
    fn select(&self) -> ClientIdentity {
        let roll = self.rng.lock().u64(..self.total_weight);
        let mut cumulative = 0u64;
        for identity in &self.identities {
            cumulative += u64::from(identity.weight);
            if roll < cumulative {
                return identity.clone();
            }
        }
        // total_weight > 0 guarantees a hit above; keep the last one as fallback
        self.identities[self.identities.len() - 1].clone()
    }
}

/// Built-in corpus of common desktop browsers weighted by rough market share
pub fn default_identities() -> Vec<ClientIdentity> {
    let common = |accept: &str, language: &str| {
        vec![
            ("Accept".to_string(), accept.to_string()),
            ("Accept-Language".to_string(), language.to_string()),
            ("DNT".to_string(), "1".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
        ]
    };

    vec![
        ClientIdentity {
            profile: HeaderProfile {
                name: "chrome_windows".to_string(),
                user_agents: vec![
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string(),
                ],
                headers: {
                    let mut h = common(
                        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                        "en-US,en;q=0.9",
                    );
                    h.push(("Upgrade-Insecure-Requests".to_string(), "1".to_string()));
                    h
                },
            },
            weight: 45,
        },
        ClientIdentity {
            profile: HeaderProfile {
                name: "safari_mac".to_string(),
                user_agents: vec![
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),
                ],
                headers: common(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    "en-US,en;q=0.9",
                ),
            },
            weight: 25,
        },
        ClientIdentity {
            profile: HeaderProfile {
                name: "firefox_windows".to_string(),
                user_agents: vec![
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
                ],
                headers: common(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
                    "en-US,en;q=0.5",
                ),
            },
            weight: 20,
        },
        ClientIdentity {
            profile: HeaderProfile {
                name: "edge_windows".to_string(),
                user_agents: vec![
                    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0".to_string(),
                ],
                headers: common(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                    "en-US,en;q=0.9",
                ),
            },
            weight: 10,
        },
    ]
}
