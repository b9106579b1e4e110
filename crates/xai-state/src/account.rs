use serde::{Deserialize, Serialize};

use xai_core::types::{Address, Amount, Nonce};

/// Per-address ledger entry: spendable balance and the highest applied nonce.
/// The next admissible transaction nonce is `nonce + 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(with = "xai_core::types::amount_string")]
    pub balance: Amount,
    pub nonce: Nonce,
}

/// Read access to account state. Implemented by the live [`crate::UtxoState`]
/// and by mempool projection overlays, so admission logic never cares which
/// one it is looking at.
pub trait AccountView {
    fn balance(&self, addr: &Address) -> Amount;
    fn nonce(&self, addr: &Address) -> Nonce;
}
