// SPDX-License-Identifier: GPL-3.0-only

//! Normalizes kernel hotplug notifications into bus events

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use storage_types::{DeviceAction, DeviceType, Event, EventType, PropertyType, UEvent};

pub const SOURCE_ID: &str = "local-storage";

/// Stable property suffix to raw uevent key, in declaration order.
const DISK_PROPERTIES: &[(&str, &str)] = &[
    ("bus", "ID_BUS"),
    ("vendor", "ID_VENDOR"),
    ("model", "ID_MODEL"),
    ("path", "DEVNAME"),
];

const PARTITION_PROPERTIES: &[(&str, &str)] = &[
    ("bus", "ID_BUS"),
    ("vendor", "ID_VENDOR"),
    ("model", "ID_MODEL"),
    ("uuid", "ID_FS_UUID"),
    ("path", "DEVNAME"),
];

/// Extra property types declared on `disk:added` for notification UIs.
const UI_PROPERTIES: &[&str] = &["ui:title", "ui:message"];

struct EventSpec {
    event_type: EventType,
    lookups: Vec<(String, &'static str)>,
}

static EVENT_TABLE: LazyLock<HashMap<(DeviceType, DeviceAction), EventSpec>> =
    LazyLock::new(build_table);

fn property_name(suffix: &str) -> String {
    format!("{SOURCE_ID}:{suffix}")
}

fn property_lookups(device_type: DeviceType) -> &'static [(&'static str, &'static str)] {
    match device_type {
        DeviceType::Disk => DISK_PROPERTIES,
        DeviceType::Partition => PARTITION_PROPERTIES,
    }
}

fn build_table() -> HashMap<(DeviceType, DeviceAction), EventSpec> {
    let mut table = HashMap::new();

    for device_type in DeviceType::ALL {
        let lookups: Vec<(String, &'static str)> = property_lookups(device_type)
            .iter()
            .map(|(suffix, key)| (property_name(suffix), *key))
            .collect();

        for action in DeviceAction::ALL {
            let mut property_types: Vec<PropertyType> = lookups
                .iter()
                .map(|(name, _)| PropertyType { name: name.clone() })
                .collect();

            if (device_type, action) == (DeviceType::Disk, DeviceAction::Add) {
                property_types.extend(UI_PROPERTIES.iter().map(|suffix| PropertyType {
                    name: property_name(suffix),
                }));
            }

            let event_type = EventType {
                source_id: SOURCE_ID.to_string(),
                name: format!("{SOURCE_ID}:{device_type}:{}", action.past_tense()),
                property_types,
            };

            table.insert(
                (device_type, action),
                EventSpec {
                    event_type,
                    lookups: lookups.clone(),
                },
            );
        }
    }

    table
}

/// Every event type this adapter can emit.
pub fn event_types() -> Vec<EventType> {
    let mut types: Vec<EventType> = EVENT_TABLE
        .values()
        .map(|spec| spec.event_type.clone())
        .collect();
    types.sort_by(|a, b| a.name.cmp(&b.name));
    types
}

/// Adapt a raw notification, or `None` for unsupported device type/action pairs.
pub fn adapt(uevent: &UEvent) -> Option<Event> {
    let device_type: DeviceType = uevent.devtype()?.parse().ok()?;
    let action: DeviceAction = uevent.action.parse().ok()?;
    let spec = EVENT_TABLE.get(&(device_type, action))?;

    let properties: BTreeMap<String, String> = spec
        .lookups
        .iter()
        .filter_map(|(name, key)| uevent.get(key).map(|value| (name.clone(), value.to_string())))
        .collect();

    Some(Event {
        source_id: spec.event_type.source_id.clone(),
        name: spec.event_type.name.clone(),
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_uevent(action: &str, devtype: &str) -> UEvent {
        UEvent::new(action)
            .with("DEVTYPE", devtype)
            .with("ID_BUS", "usb")
            .with("ID_VENDOR", "SanDisk")
            .with("ID_MODEL", "Ultra")
            .with("DEVNAME", "/dev/sdb1")
            .with("ID_FS_UUID", "0f4e6f4c")
    }

    #[test]
    fn names_every_supported_pair() {
        for device_type in DeviceType::ALL {
            for action in DeviceAction::ALL {
                let event = adapt(&full_uevent(action.as_str(), device_type.as_str()))
                    .expect("supported pair");
                assert_eq!(
                    event.name,
                    format!("local-storage:{}:{}", device_type, action.past_tense())
                );
                assert_eq!(event.source_id, SOURCE_ID);
            }
        }
        assert_eq!(event_types().len(), 4);
    }

    #[test]
    fn partition_events_carry_uuid_and_disks_do_not() {
        let partition = adapt(&full_uevent("add", "partition")).expect("partition");
        assert_eq!(
            partition.properties.get("local-storage:uuid").map(String::as_str),
            Some("0f4e6f4c")
        );
        assert_eq!(partition.properties.len(), 5);

        let disk = adapt(&full_uevent("remove", "disk")).expect("disk");
        assert!(!disk.properties.contains_key("local-storage:uuid"));
        assert_eq!(
            disk.properties.get("local-storage:path").map(String::as_str),
            Some("/dev/sdb1")
        );
    }

    #[test]
    fn missing_keys_are_omitted() {
        let event = adapt(
            &UEvent::new("add")
                .with("DEVTYPE", "disk")
                .with("DEVNAME", "/dev/sdc"),
        )
        .expect("disk add");

        assert_eq!(event.properties.len(), 1);
        assert_eq!(event.properties["local-storage:path"], "/dev/sdc");
    }

    #[test]
    fn unsupported_pairs_yield_nothing() {
        assert!(adapt(&full_uevent("change", "disk")).is_none());
        assert!(adapt(&full_uevent("add", "loop")).is_none());
        assert!(adapt(&UEvent::new("add")).is_none());
    }

    #[test]
    fn only_disk_add_declares_ui_properties() {
        let names = |device_type, action| -> Vec<String> {
            EVENT_TABLE
                .get(&(device_type, action))
                .expect("declared")
                .event_type
                .property_types
                .iter()
                .map(|p| p.name.clone())
                .collect()
        };

        assert_eq!(
            names(DeviceType::Disk, DeviceAction::Add),
            vec![
                "local-storage:bus",
                "local-storage:vendor",
                "local-storage:model",
                "local-storage:path",
                "local-storage:ui:title",
                "local-storage:ui:message",
            ]
        );
        assert!(
            !names(DeviceType::Disk, DeviceAction::Remove)
                .contains(&"local-storage:ui:title".to_string())
        );
        assert_eq!(
            names(DeviceType::Partition, DeviceAction::Add),
            vec![
                "local-storage:bus",
                "local-storage:vendor",
                "local-storage:model",
                "local-storage:uuid",
                "local-storage:path",
            ]
        );
    }
}
