//! Roles and automatic binding of roles to device services.

use rustc_hash::FxHashMap;

use crate::env::DeviceInfo;
use crate::packet::{DeviceId, Packet};

/// Service indices above this are never bound.
const MAX_SERVICES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub device: DeviceId,
    pub service_index: u8,
}

/// A role slot of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Role {
    pub class_id: u32,
    pub binding: Option<Binding>,
    /// Served by the VM itself and never bound to a device.
    pub local: bool,
}

impl Role {
    pub fn new(class_id: u32, local: bool) -> Self {
        Role {
            class_id,
            binding: None,
            local,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.local || self.binding.is_some()
    }

    /// Whether `pkt` was sent by the service this role is bound to.
    /// Announcements from the device's control service match every role.
    pub fn receives(&self, pkt: &Packet) -> bool {
        match self.binding {
            Some(b) => {
                b.device == pkt.device
                    && (b.service_index == pkt.service_index
                        || (pkt.service_index == 0 && pkt.service_command == 0))
            }
            None => false,
        }
    }

    /// Command to this role's service. `None` while unbound.
    pub fn command(&self, code: u16, data: Vec<u8>) -> Option<Packet> {
        let b = self.binding?;
        Some(Packet::command(b.device, b.service_index, code, data))
    }
}

/// Bind every unbound role to the first free service of its class,
/// scanning devices in id order. Returns the indices of newly bound roles.
///
/// A service index is claimed by at most one role.
pub(crate) fn autobind(roles: &mut [Role], devices: &mut [DeviceInfo]) -> Vec<usize> {
    if roles.iter().all(|r| r.local || r.binding.is_some()) {
        return Vec::new();
    }

    let mut used: FxHashMap<DeviceId, u32> = FxHashMap::default();
    for b in roles.iter().filter_map(|r| r.binding) {
        *used.entry(b.device).or_default() |= 1 << b.service_index;
    }

    devices.sort_by_key(|d| d.id);
    let mut bound = Vec::new();
    for (idx, role) in roles.iter_mut().enumerate() {
        if role.local || role.binding.is_some() {
            continue;
        }
        'devices: for d in devices.iter() {
            let claimed = used.entry(d.id).or_default();
            for i in 1..d.services.len().min(MAX_SERVICES) {
                if d.service_class_at(i) == Some(role.class_id) && *claimed & (1 << i) == 0 {
                    *claimed |= 1 << i;
                    role.binding = Some(Binding {
                        device: d.id,
                        service_index: i as u8,
                    });
                    tracing::info!(role = idx, device = %d.id, service = i, "role bound");
                    bound.push(idx);
                    break 'devices;
                }
            }
        }
    }
    bound
}

/// Unbind every role on `device`. Returns the indices of the roles dropped.
pub(crate) fn unbind_device(roles: &mut [Role], device: DeviceId) -> Vec<usize> {
    let mut dropped = Vec::new();
    for (idx, role) in roles.iter_mut().enumerate() {
        if role.binding.is_some_and(|b| b.device == device) {
            role.binding = None;
            tracing::info!(role = idx, %device, "role unbound");
            dropped.push(idx);
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUTTON: u32 = 0x10;
    const LED: u32 = 0x20;

    fn dev(id: u64, services: &[u32]) -> DeviceInfo {
        let mut all = vec![0];
        all.extend_from_slice(services);
        DeviceInfo::new(DeviceId(id), all)
    }

    #[test]
    fn binds_in_device_id_order() {
        let mut roles = vec![Role::new(BUTTON, false)];
        let mut devices = vec![dev(9, &[BUTTON]), dev(2, &[LED, BUTTON])];
        assert_eq!(autobind(&mut roles, &mut devices), vec![0]);
        assert_eq!(
            roles[0].binding,
            Some(Binding {
                device: DeviceId(2),
                service_index: 2
            })
        );
    }

    #[test]
    fn one_role_per_service() {
        let mut roles = vec![
            Role::new(BUTTON, false),
            Role::new(BUTTON, false),
            Role::new(BUTTON, false),
        ];
        let mut devices = vec![dev(1, &[BUTTON, BUTTON])];
        assert_eq!(autobind(&mut roles, &mut devices), vec![0, 1]);
        assert_ne!(roles[0].binding, roles[1].binding);
        assert!(roles[2].binding.is_none());

        // an already bound slot is not handed out again
        devices.push(dev(0, &[BUTTON]));
        assert_eq!(autobind(&mut roles, &mut devices), vec![2]);
        assert_eq!(roles[2].binding.unwrap().device, DeviceId(0));
    }

    #[test]
    fn local_roles_are_left_alone() {
        let mut roles = vec![Role::new(BUTTON, true)];
        let mut devices = vec![dev(1, &[BUTTON])];
        assert!(autobind(&mut roles, &mut devices).is_empty());
        assert!(roles[0].is_connected());
    }

    #[test]
    fn control_announcements_reach_every_role() {
        let mut roles = vec![Role::new(BUTTON, false)];
        autobind(&mut roles, &mut [dev(1, &[BUTTON])]);
        let role = &roles[0];
        assert!(role.receives(&Packet::report(DeviceId(1), 1, 0x1101, vec![])));
        assert!(role.receives(&Packet::report(DeviceId(1), 0, 0, vec![])));
        assert!(!role.receives(&Packet::report(DeviceId(1), 0, 0x1101, vec![])));
        assert!(!role.receives(&Packet::report(DeviceId(2), 1, 0x1101, vec![])));
    }

    #[test]
    fn unbinding_a_device() {
        let mut roles = vec![Role::new(BUTTON, false), Role::new(LED, false)];
        autobind(&mut roles, &mut [dev(1, &[BUTTON]), dev(2, &[LED])]);
        assert_eq!(unbind_device(&mut roles, DeviceId(1)), vec![0]);
        assert!(!roles[0].is_connected());
        assert!(roles[1].is_connected());
    }
}
