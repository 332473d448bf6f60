//! A kernel debugger core that lives in VMX root.
//!
//! Halts and resumes cores, elects the core that talks to the remote debugger and serves
//! the debugger's commands while the guest is stopped. Hardware access is confined to
//! [`intel`]; the engine in [`kd`] only sees the traits of [`kd::platform`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate static_assertions;

pub mod config;
pub mod error;
pub mod global_const;
pub mod intel;
pub mod kd;
#[cfg(target_arch = "x86_64")]
pub mod logger;
