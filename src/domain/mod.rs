mod integrity;
mod ledger;
mod money;
mod transaction;
mod wallet;

pub use integrity::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use wallet::*;
