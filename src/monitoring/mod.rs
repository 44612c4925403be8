//! Wallet activity monitoring
//!
//! Push and poll observation of watched addresses, balance-delta
//! classification, and the supervisor that routes purchase events to
//! subscribers.

pub mod classifier;
pub mod copy_trade;
pub mod monitor;
pub mod reorder;
pub mod seen;
pub mod stream;
pub mod supervisor;

pub use classifier::{classify, Acquisition, Classification, ClassifyError};
pub use copy_trade::{
    CopySettings, CopyTradeSubscriber, SettingsProvider, SharedSigner, SignerProvider, StaticSettings,
};
pub use monitor::{MonitorContext, MonitorMessage, WalletMonitor};
pub use reorder::ReorderBuffer;
pub use seen::SeenSignatures;
pub use stream::{StreamMessage, StreamSubscription, StreamTransport, WebSocketTransport};
pub use supervisor::{MonitorSnapshot, MonitorSupervisor, NotificationSubscriber, PurchaseSubscriber};
