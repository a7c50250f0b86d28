//! Cache of register values read from bound roles.
//!
//! Entries are keyed by `(role, get code, argument)` and stamped with an
//! access counter. When the cache is full, eviction raises an access floor
//! and drops everything at or below it until at most half the capacity is
//! live, so evicted entries are always older than retained ones.

use crate::packet::Packet;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CachedRegister {
    pub role: usize,
    pub code: u16,
    /// Register sub-argument; reports carry it NUL-terminated ahead of the
    /// value.
    pub argument: Option<Vec<u8>>,
    pub last_access: u64,
    pub last_refresh: u64,
    pub value: Vec<u8>,
    pub dead: bool,
}

impl CachedRegister {
    pub fn new(role: usize, code: u16, argument: Option<Vec<u8>>) -> Self {
        CachedRegister {
            role,
            code,
            argument,
            last_access: 0,
            last_refresh: 0,
            value: Vec::new(),
            dead: false,
        }
    }

    /// Stale once more than `validity` ms have passed since the last
    /// refresh.
    pub fn expired(&self, now: u64, validity: u64) -> bool {
        now.saturating_sub(self.last_refresh) > validity
    }

    /// Take the value from `pkt` if it answers this entry.
    pub fn update_with(&mut self, role: usize, pkt: &Packet, now: u64) -> bool {
        if self.dead || self.role != role || self.code != pkt.service_command || !pkt.is_report() {
            return false;
        }
        let value = match &self.argument {
            None => &pkt.data[..],
            Some(arg) => {
                let n = arg.len();
                if pkt.data.len() > n && pkt.data[n] == 0 && pkt.data[..n] == arg[..] {
                    &pkt.data[n + 1..]
                } else {
                    return false;
                }
            }
        };
        self.value = value.to_vec();
        self.last_refresh = now;
        true
    }
}

#[derive(Debug)]
pub(crate) struct RegisterCache {
    regs: Vec<CachedRegister>,
    access: u64,
    capacity: usize,
}

impl RegisterCache {
    pub fn new(capacity: usize) -> Self {
        RegisterCache {
            regs: Vec::new(),
            access: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn live(&self) -> usize {
        self.regs.iter().filter(|r| !r.dead).count()
    }

    fn position(&self, role: usize, code: u16, argument: Option<&[u8]>) -> Option<usize> {
        self.regs.iter().position(|r| {
            !r.dead && r.role == role && r.code == code && r.argument.as_deref() == argument
        })
    }

    /// A fresh entry, marked as used. Expired entries are killed on the way.
    pub fn lookup(
        &mut self,
        role: usize,
        code: u16,
        argument: Option<&[u8]>,
        now: u64,
        validity: u64,
    ) -> Option<&CachedRegister> {
        let i = self.position(role, code, argument)?;
        if self.regs[i].expired(now, validity) {
            self.regs[i].dead = true;
            return None;
        }
        self.regs[i].last_access = self.access;
        self.access += 1;
        Some(&self.regs[i])
    }

    /// Drop the entry for `code`, if any.
    pub fn invalidate(&mut self, role: usize, code: u16) {
        if let Some(i) = self.position(role, code, None) {
            self.regs[i].dead = true;
        }
    }

    pub fn detach_role(&mut self, role: usize) {
        for r in self.regs.iter_mut().filter(|r| r.role == role) {
            r.dead = true;
        }
    }

    pub fn update_with(&mut self, role: usize, pkt: &Packet, now: u64) {
        for r in &mut self.regs {
            r.update_with(role, pkt, now);
        }
    }

    pub fn add(&mut self, mut entry: CachedRegister) {
        if self.regs.len() >= self.capacity {
            self.evict();
        }
        entry.last_access = self.access;
        self.access += 1;
        self.regs.push(entry);
    }

    fn evict(&mut self) {
        let target = self.capacity / 2;
        loop {
            let live = self.regs.iter().filter(|r| !r.dead);
            let (count, floor) = live.fold((0, u64::MAX), |(n, min), r| {
                (n + 1, min.min(r.last_access))
            });
            if count <= target {
                break;
            }
            for r in self.regs.iter_mut().filter(|r| r.last_access <= floor) {
                r.dead = true;
            }
        }
        let before = self.regs.len();
        self.regs.retain(|r| !r.dead);
        tracing::debug!(evicted = before - self.regs.len(), "register cache compacted");
    }

    #[cfg(test)]
    pub fn entries(&self) -> impl Iterator<Item = &CachedRegister> {
        self.regs.iter().filter(|r| !r.dead)
    }
}
