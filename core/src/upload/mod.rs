pub mod backup;
pub mod buffer;
pub mod delivery;
pub mod worker;

pub use backup::{BackupError, BackupStore};
pub use buffer::{OutboundBuffer, PushOutcome, UploadBatch, WakeReason};
pub use delivery::{DeliveryClient, DeliveryError, DeliveryReceipt, HttpDelivery, OfflineDelivery};
pub use worker::{DispatchOutcome, FlushReport, UploadHandle, UploadWorker};
