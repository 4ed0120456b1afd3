//! `teachprompt-events`: advisory wake-up notifications.
//!
//! The durable job store is the system of record. Everything in this crate is
//! a latency optimization: messages may be dropped, duplicated, or reordered,
//! and consumers must behave correctly if they never arrive.

pub mod bus;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{NotificationBus, RecvTimeoutError, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryNotificationBus};
pub use notification::{JobNotification, Topic};
