//! # redisq
//!
//! A Redis-backed work queue with deduplication, delayed delivery and
//! debouncing, plus the receivers that consume it.
//!
//! Producers [`send`](transport::Transport::send) envelopes through a
//! [`Transport`](transport::Transport). Workers run a
//! [`Receiver`](receiver::Receiver), usually a
//! [`RetryForeverReceiver`](receiver::RetryForeverReceiver) around a
//! [`QueueReceiver`](transport::QueueReceiver), optionally supervised by an
//! [`AutoScalingReceiver`](receiver::AutoScalingReceiver).

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod process;
pub mod receiver;
pub mod store;
pub mod telemetry;
pub mod transport;
