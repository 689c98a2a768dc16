//! Playback side of the stream daemon: the controller actor, the resources it
//! leases, the media transport it drives and the control socket in front of
//! it.

pub mod client;
pub mod controller;
pub mod interruption;
pub mod lease;
pub mod mpv;
pub mod socket;
pub mod transport;
