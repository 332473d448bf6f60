pub mod capture;
#[cfg(target_arch = "x86_64")]
pub mod platform;
#[cfg(target_arch = "x86_64")]
pub mod serial;
#[cfg(target_arch = "x86_64")]
pub mod support;
pub mod vmexit;
