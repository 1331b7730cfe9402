//! Camdeck common library – calendar arithmetic, clip scheduling, the
//! operation catalog and the wire types shared with the gateway.

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod protocol;
pub mod schedule;
pub mod storage;
pub mod timestamp;
