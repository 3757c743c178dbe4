#![allow(dead_code)]

pub mod range;
pub mod socket_guard;
