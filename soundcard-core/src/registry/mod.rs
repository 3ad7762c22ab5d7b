pub mod card;
pub mod hotplug;
pub mod manager;
