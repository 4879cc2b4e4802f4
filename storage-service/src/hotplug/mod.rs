// SPDX-License-Identifier: GPL-3.0-only

//! Kernel hotplug notifications to normalized bus events

pub mod events;
pub mod listener;

pub use events::event_types;
pub use listener::HotplugListener;
