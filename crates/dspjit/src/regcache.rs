//! The register cache maps the guest register file onto host registers while a block is
//! compiled.
//!
//! The five composite registers (both 40-bit accumulators, both AX pairs and the product) are
//! cached as a whole. Their 16-bit sub-registers never live on their own: acquiring one brings the
//! parent into a host register and rotates it until the sub-register occupies the low 16 bits.
//! Everything else is cached on its own, either in a host register or as a known immediate.
use crate::{
    Settings,
    emitter::{AluOp, Emitter, Operand},
    host::{self, HOST_REGS, HostReg},
};
use dspint::{Reg, Slot};
use std::fmt;

pub const LOGICAL_REGS: usize = 37;

/// A guest register as seen by the cache: the 32 architectural registers followed by the five
/// composites.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalReg(u8);

impl LogicalReg {
    pub const ACC0_64: Self = Self(32);
    pub const ACC1_64: Self = Self(33);
    pub const AX0_32: Self = Self(34);
    pub const AX1_32: Self = Self(35);
    pub const PROD_64: Self = Self(36);

    #[inline(always)]
    pub const fn acc(index: usize) -> Self {
        Self(32 + index as u8)
    }

    #[inline(always)]
    pub const fn ax(index: usize) -> Self {
        Self(34 + index as u8)
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The architectural register, if this is not a composite.
    pub fn reg(self) -> Option<Reg> {
        (self.0 < 32).then(|| Reg::new(self.0))
    }

    pub fn is_acc(self) -> bool {
        self == Self::ACC0_64 || self == Self::ACC1_64
    }

    /// Parent and bit offset of a sub-register.
    pub fn parent(self) -> Option<(LogicalReg, u8)> {
        let reg = self.reg()?;
        let parent = match reg {
            Reg::Ach0 | Reg::Ach1 => (Self::acc(reg as usize - Reg::Ach0 as usize), 32),
            Reg::Prodl => (Self::PROD_64, 0),
            Reg::Prodm => (Self::PROD_64, 16),
            Reg::Prodh => (Self::PROD_64, 32),
            Reg::Prodm2 => (Self::PROD_64, 48),
            Reg::Axl0 | Reg::Axl1 => (Self::ax(reg as usize - Reg::Axl0 as usize), 0),
            Reg::Axh0 | Reg::Axh1 => (Self::ax(reg as usize - Reg::Axh0 as usize), 16),
            Reg::Acl0 | Reg::Acl1 => (Self::acc(reg as usize - Reg::Acl0 as usize), 0),
            Reg::Acm0 | Reg::Acm1 => (Self::acc(reg as usize - Reg::Acm0 as usize), 16),
            _ => return None,
        };

        Some(parent)
    }

    /// Size in bytes.
    pub fn size(self) -> u8 {
        match self.0 {
            32 | 33 | 36 => 8,
            34 | 35 => 4,
            _ => 2,
        }
    }

    /// Storage slot of a register which is not a sub-register.
    fn slot(self) -> Slot {
        match self.0 {
            32 | 33 => Slot::Acc(self.0 - 32),
            34 | 35 => Slot::Ax(self.0 - 34),
            36 => Slot::Prod,
            index => Slot::Reg(Reg::new(index)),
        }
    }

    fn roots() -> impl Iterator<Item = LogicalReg> {
        (0..LOGICAL_REGS as u8)
            .map(LogicalReg)
            .filter(|reg| reg.parent().is_none())
    }
}

impl From<Reg> for LogicalReg {
    fn from(value: Reg) -> Self {
        Self(value as u8)
    }
}

impl fmt::Debug for LogicalReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            32 => write!(f, "ACC0_64"),
            33 => write!(f, "ACC1_64"),
            34 => write!(f, "AX0_32"),
            35 => write!(f, "AX1_32"),
            36 => write!(f, "PROD_64"),
            index => write!(f, "{:?}", Reg::new(index)),
        }
    }
}

/// Where the current value of a register lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    Mem,
    Host(HostReg),
    Imm(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    loc: Loc,
    dirty: bool,
    used: bool,
    last_use: u64,
    parent: Option<LogicalReg>,
    /// Rotation of a composite, offset inside the parent of a sub-register.
    shift: u8,
    home: Option<HostReg>,
    size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Free,
    Reserved,
    Temp,
    Guest(LogicalReg),
}

/// Registers saved around an open host call.
#[derive(Debug, Clone)]
struct CallFrame {
    temps: Vec<HostReg>,
    frame: bool,
}

#[derive(Debug, Clone)]
pub struct RegCache {
    entries: [Entry; LOGICAL_REGS],
    host: [HostState; HOST_REGS],
    use_ctr: u64,
    call: Option<CallFrame>,
    /// Set on snapshots until they are merged or discarded.
    temporary: bool,
}

impl RegCache {
    pub fn new(settings: &Settings) -> Self {
        let mut entries = std::array::from_fn(|index| {
            let reg = LogicalReg(index as u8);
            let (parent, shift) = reg.parent().map_or((None, 0), |(p, s)| (Some(p), s));

            Entry {
                loc: Loc::Mem,
                dirty: false,
                used: false,
                last_use: 0,
                parent,
                shift,
                home: None,
                size: reg.size(),
            }
        });

        let mut host = [HostState::Free; HOST_REGS];
        host[HostReg::RET.index()] = HostState::Reserved;
        host[HostReg::SP.index()] = HostState::Reserved;

        if settings.static_accumulators {
            for (index, home) in host::ACC_HOMES.into_iter().enumerate() {
                let entry: &mut Entry = &mut entries[LogicalReg::acc(index).index()];
                entry.home = Some(home);
                host[home.index()] = HostState::Reserved;
            }
        }

        Self {
            entries,
            host,
            use_ctr: 0,
            call: None,
            temporary: false,
        }
    }

    #[inline(always)]
    fn root(reg: LogicalReg) -> (LogicalReg, u8) {
        reg.parent().unwrap_or((reg, 0))
    }

    #[inline(always)]
    fn entry(&self, reg: LogicalReg) -> &Entry {
        &self.entries[reg.index()]
    }

    #[inline(always)]
    fn entry_mut(&mut self, reg: LogicalReg) -> &mut Entry {
        &mut self.entries[reg.index()]
    }

    #[inline(always)]
    fn set_host(&mut self, reg: HostReg, state: HostState) {
        self.host[reg.index()] = state;
    }

    /// Location of `reg`, which is the location of its parent for sub-registers.
    pub fn loc(&self, reg: LogicalReg) -> Loc {
        self.entry(Self::root(reg).0).loc
    }

    pub fn is_dirty(&self, reg: LogicalReg) -> bool {
        self.entry(Self::root(reg).0).dirty
    }

    pub fn host_state(&self, reg: HostReg) -> HostState {
        self.host[reg.index()]
    }

    /// Rotates the composite `reg` so that bit `shift` of its value lands on bit 0.
    fn rotate(&mut self, em: &mut Emitter, reg: LogicalReg, shift: u8) {
        let entry = *self.entry(reg);
        let Loc::Host(host) = entry.loc else {
            unreachable!("{reg:?} is not resident");
        };

        let width = entry.size * 8;
        if entry.shift != shift {
            em.rotate(host, (shift + width - entry.shift) % width, width);
            self.entry_mut(reg).shift = shift;
        }
    }

    /// Stores `reg` to its slot if it is dirty. Resident registers are rotated back first.
    fn writeback(&mut self, em: &mut Emitter, reg: LogicalReg) {
        let entry = *self.entry(reg);
        if !entry.dirty {
            return;
        }

        match entry.loc {
            Loc::Host(host) => {
                self.rotate(em, reg, 0);
                em.store(reg.slot(), host);
            }
            Loc::Imm(value) => {
                em.imm(HostReg::RET, value);
                em.store(reg.slot(), HostReg::RET);
            }
            Loc::Mem => unreachable!("{reg:?} is dirty but lives in memory"),
        }

        self.entry_mut(reg).dirty = false;
    }

    /// Writes `reg` back and forgets where it was cached.
    fn evict(&mut self, em: &mut Emitter, reg: LogicalReg) {
        debug_assert!(!self.entry(reg).used, "{reg:?} evicted while in use");
        self.writeback(em, reg);

        let entry = *self.entry(reg);
        if let Loc::Host(host) = entry.loc {
            let state = if entry.home.is_some() {
                HostState::Reserved
            } else {
                HostState::Free
            };

            self.set_host(host, state);
        }

        let entry = self.entry_mut(reg);
        entry.loc = Loc::Mem;
        entry.shift = 0;
    }

    /// Evicts the unused guest register which was released the longest ago and returns the host
    /// register it occupied.
    pub fn spill(&mut self, em: &mut Emitter) -> HostReg {
        let mut victim: Option<(LogicalReg, HostReg, u64)> = None;
        for host in host::GUEST_ORDER {
            let HostState::Guest(reg) = self.host_state(host) else {
                continue;
            };

            let entry = self.entry(reg);
            if entry.used || entry.home.is_some() {
                continue;
            }

            let age = self.use_ctr - entry.last_use;
            if victim.is_none_or(|(_, _, oldest)| age > oldest) {
                victim = Some((reg, host, age));
            }
        }

        let Some((reg, host, _)) = victim else {
            panic!("no host register can be spilled");
        };

        tracing::trace!("spilling {reg:?} from {host:?}");
        self.evict(em, reg);
        host
    }

    fn alloc(&mut self, em: &mut Emitter, reg: LogicalReg) -> HostReg {
        if let Some(home) = self.entry(reg).home {
            return home;
        }

        let free = host::GUEST_ORDER
            .into_iter()
            .find(|host| self.host_state(*host) == HostState::Free);

        match free {
            Some(host) => host,
            None => self.spill(em),
        }
    }

    /// Brings `reg` into a host register and marks it as in use until [`RegCache::release`].
    /// Sub-registers are always loaded and come back rotated to the low 16 bits. If `load` is
    /// unset, the caller must overwrite the whole register.
    pub fn acquire(&mut self, em: &mut Emitter, reg: LogicalReg, load: bool) -> HostReg {
        assert!(
            self.call.is_none(),
            "{reg:?} acquired inside a host call wrapper"
        );

        let (root, shift) = Self::root(reg);
        let load = load || root != reg;
        let entry = *self.entry(root);
        assert!(!entry.used, "{reg:?} acquired while in use");

        let host = match entry.loc {
            Loc::Host(host) => host,
            Loc::Imm(value) => {
                let host = self.alloc(em, root);
                if load {
                    em.imm(host, value);
                }

                host
            }
            Loc::Mem => {
                let host = self.alloc(em, root);
                if load {
                    em.load(host, root.slot());
                    if root.is_acc() {
                        em.extend(host, 40, true);
                    }
                }

                host
            }
        };

        if entry.loc != Loc::Host(host) {
            self.set_host(host, HostState::Guest(root));
            let entry = self.entry_mut(root);
            entry.loc = Loc::Host(host);
            entry.shift = 0;
        }

        self.entry_mut(root).used = true;
        self.rotate(em, root, shift);
        host
    }

    /// Ends a use of `reg`. If `dirty` is set the value was modified and is normalised: `ACHn`
    /// is sign extended from 8 bits, `PRODH` is masked to 8 bits and whole accumulators are
    /// sign extended from 40 bits.
    pub fn release(&mut self, em: &mut Emitter, reg: LogicalReg, dirty: bool) {
        let (root, _) = Self::root(reg);
        let entry = *self.entry(root);
        assert!(entry.used, "{reg:?} released without being acquired");

        let Loc::Host(host) = entry.loc else {
            unreachable!("{reg:?} is in use but not resident");
        };

        if dirty {
            match reg.reg() {
                Some(Reg::Ach0 | Reg::Ach1) => {
                    self.rotate(em, root, 0);
                    em.extend(host, 40, true);
                }
                Some(Reg::Prodh) => em.alu(AluOp::And, host, host, Operand::Imm(!0xFF00)),
                None if root.is_acc() => {
                    debug_assert_eq!(entry.shift, 0);
                    em.extend(host, 40, true);
                }
                _ => (),
            }
        }

        let last_use = self.use_ctr;
        self.use_ctr += 1;

        let entry = self.entry_mut(root);
        entry.dirty |= dirty;
        entry.used = false;
        entry.last_use = last_use;
    }

    /// Copies `reg` into `dst`, extending it from its width.
    pub fn read(&mut self, em: &mut Emitter, reg: LogicalReg, dst: HostReg, signed: bool) {
        if let (None, Loc::Imm(value)) = (reg.parent(), self.entry(reg).loc) {
            let value = if signed {
                value as u16 as i16 as i64 as u64
            } else {
                value
            };

            em.imm(dst, value);
            return;
        }

        let host = self.acquire(em, reg, true);
        em.mov(dst, host);

        let bits = if reg.parent().is_some() {
            16
        } else {
            reg.size() * 8
        };

        if bits < 64 {
            em.extend(dst, bits, signed);
        }

        self.release(em, reg, false);
    }

    /// Writes `src` into `reg`. Immediates written to plain 16-bit registers are only
    /// remembered.
    pub fn write(&mut self, em: &mut Emitter, reg: LogicalReg, src: Operand) {
        if reg.parent().is_some() {
            let host = self.acquire(em, reg, true);
            em.insert(host, src, 16);
            self.release(em, reg, true);
            return;
        }

        match (reg.size(), src) {
            (2, Operand::Imm(value)) => {
                let entry = *self.entry(reg);
                assert!(!entry.used, "{reg:?} written while in use");

                if let Loc::Host(host) = entry.loc {
                    self.set_host(host, HostState::Free);
                }

                let last_use = self.use_ctr;
                self.use_ctr += 1;

                let entry = self.entry_mut(reg);
                entry.loc = Loc::Imm(value & 0xFFFF);
                entry.dirty = true;
                entry.shift = 0;
                entry.last_use = last_use;
            }
            (size, src) => {
                let host = self.acquire(em, reg, false);
                match src {
                    Operand::Reg(src) => em.mov(host, src),
                    Operand::Imm(value) => em.imm(host, value),
                }

                if size < 8 {
                    em.extend(host, size * 8, false);
                }

                self.release(em, reg, true);
            }
        }
    }

    /// Allocates a temporary host register.
    pub fn scratch(&mut self, em: &mut Emitter) -> HostReg {
        assert!(self.call.is_none(), "scratch allocated inside a host call wrapper");

        let free = host::SCRATCH
            .into_iter()
            .chain(host::GUEST_ORDER)
            .find(|host| self.host_state(*host) == HostState::Free);

        let host = match free {
            Some(host) => host,
            None => self.spill(em),
        };

        self.set_host(host, HostState::Temp);
        host
    }

    pub fn free_scratch(&mut self, host: HostReg) {
        assert_eq!(
            self.host_state(host),
            HostState::Temp,
            "{host:?} is not a temporary"
        );

        self.set_host(host, HostState::Free);
    }

    /// Takes `host` as a temporary, evicting whatever guest register it holds.
    pub fn claim(&mut self, em: &mut Emitter, host: HostReg) {
        match self.host_state(host) {
            HostState::Free => (),
            HostState::Guest(reg) => {
                assert!(!self.entry(reg).used, "{host:?} holds {reg:?}, which is in use");
                assert!(self.entry(reg).home.is_none(), "{host:?} is the home of {reg:?}");
                self.evict(em, reg);
            }
            state => panic!("{host:?} cannot be claimed, it is {state:?}"),
        }

        self.set_host(host, HostState::Temp);
    }

    /// Returns a register holding the value of `host` which can be passed to a host call. Values in
    /// [`HostReg::FRAME`] are copied into a new temporary, which the caller frees.
    pub fn make_call_safe(&mut self, em: &mut Emitter, host: HostReg) -> HostReg {
        if host != HostReg::FRAME {
            return host;
        }

        let safe = host::SCRATCH
            .into_iter()
            .chain(host::GUEST_ORDER)
            .filter(|reg| *reg != HostReg::FRAME)
            .find(|reg| self.host_state(*reg) == HostState::Free);

        let Some(safe) = safe else {
            panic!("no free register to move the frame register into");
        };

        em.mov(safe, host);
        self.set_host(safe, HostState::Temp);
        safe
    }

    /// Saves the registers a host call may clobber: temporaries go to the host stack and the frame
    /// register is saved if it holds anything.
    pub fn push_regs(&mut self, em: &mut Emitter) {
        assert!(self.call.is_none(), "host call wrappers cannot nest");

        let temps: Vec<HostReg> = (0..HOST_REGS as u8)
            .map(HostReg::new)
            .filter(|host| *host != HostReg::FRAME)
            .filter(|host| self.host_state(*host) == HostState::Temp)
            .collect();

        for temp in &temps {
            em.push(*temp);
        }

        let frame = self.host_state(HostReg::FRAME) != HostState::Free;
        if frame {
            em.save_frame();
        }

        self.call = Some(CallFrame { temps, frame });
    }

    pub fn pop_regs(&mut self, em: &mut Emitter) {
        let Some(call) = self.call.take() else {
            panic!("pop_regs without a matching push_regs");
        };

        if call.frame {
            em.restore_frame();
        }

        for temp in call.temps.iter().rev() {
            em.pop(*temp);
        }
    }

    /// Block prologue.
    pub fn load_regs(&mut self, em: &mut Emitter) {
        em.save_frame();

        for index in 0..2 {
            let reg = LogicalReg::acc(index);
            let Some(home) = self.entry(reg).home else {
                continue;
            };

            em.load(home, reg.slot());
            em.extend(home, 40, true);
            self.set_host(home, HostState::Guest(reg));

            let entry = self.entry_mut(reg);
            entry.loc = Loc::Host(home);
            entry.shift = 0;
            entry.dirty = false;
        }
    }

    /// Block epilogue.
    pub fn save_regs(&mut self, em: &mut Emitter) {
        self.flush_all(em);
        em.restore_frame();
    }

    /// Makes memory hold the value of every register. Registers with a static home are rotated
    /// back, written back and stay resident, everything else is evicted.
    pub fn flush_mem_backed(&mut self, em: &mut Emitter) {
        for reg in LogicalReg::roots() {
            let entry = *self.entry(reg);
            assert!(!entry.used, "{reg:?} flushed while in use");

            match (entry.home, entry.loc) {
                (_, Loc::Mem) => (),
                (Some(_), Loc::Host(_)) => {
                    self.rotate(em, reg, 0);
                    self.writeback(em, reg);
                }
                _ => self.evict(em, reg),
            }
        }
    }

    /// Evicts every register.
    pub fn flush_all(&mut self, em: &mut Emitter) {
        self.flush_mem_backed(em);
        for index in 0..2 {
            let reg = LogicalReg::acc(index);
            if self.entry(reg).loc != Loc::Mem {
                self.evict(em, reg);
            }
        }
    }

    /// Reloads the registers [`RegCache::flush_mem_backed`] left resident, after memory may
    /// have been changed behind the cache.
    pub fn refresh_homes(&mut self, em: &mut Emitter) {
        for index in 0..2 {
            let reg = LogicalReg::acc(index);
            let entry = *self.entry(reg);
            if let (Some(home), Loc::Host(_)) = (entry.home, entry.loc) {
                debug_assert!(!entry.dirty && entry.shift == 0);
                em.load(home, reg.slot());
                em.extend(home, 40, true);
            }
        }
    }

    /// Writes back registers cached as immediates. Needed before taking a snapshot that another
    /// path will be merged into.
    pub fn settle(&mut self, em: &mut Emitter) {
        for reg in LogicalReg::roots() {
            if matches!(self.entry(reg).loc, Loc::Imm(_)) {
                self.evict(em, reg);
            }
        }
    }

    /// Copies the cache. The copy must be merged back with [`RegCache::flush_to`] or dropped with
    /// [`RegCache::discard`].
    pub fn snapshot(&self) -> Self {
        assert!(self.call.is_none(), "snapshot inside a host call wrapper");

        let mut snapshot = self.clone();
        snapshot.temporary = true;
        snapshot
    }

    pub fn discard(mut self) {
        self.temporary = false;
    }

    /// Continues from `snapshot`, dropping the current state. Used after a path which leaves the
    /// block has been emitted.
    pub fn restore(&mut self, mut snapshot: RegCache) {
        snapshot.temporary = false;
        *self = snapshot;
    }

    /// Emits code that brings the cache into the state of `target`.
    pub fn flush_to(&mut self, em: &mut Emitter, mut target: RegCache) {
        assert!(self.call.is_none() && target.call.is_none());

        // registers the target keeps in memory
        for reg in LogicalReg::roots() {
            let current = self.entry(reg).loc;
            match target.entry(reg).loc {
                Loc::Mem if current != Loc::Mem => self.evict(em, reg),
                Loc::Imm(value) => assert_eq!(
                    current,
                    Loc::Imm(value),
                    "{reg:?} was not settled before branching"
                ),
                _ => (),
            }
        }

        // registers in the wrong host register, moved while the right one is free
        loop {
            let mut moved = false;
            for reg in LogicalReg::roots() {
                let (Loc::Host(from), Loc::Host(to)) = (self.entry(reg).loc, target.entry(reg).loc)
                else {
                    continue;
                };

                if from == to || self.host_state(to) != HostState::Free {
                    continue;
                }

                em.mov(to, from);
                self.set_host(from, HostState::Free);
                self.set_host(to, HostState::Guest(reg));
                self.entry_mut(reg).loc = Loc::Host(to);
                moved = true;
            }

            if !moved {
                break;
            }
        }

        // whatever is still misplaced
        for reg in LogicalReg::roots() {
            match (self.entry(reg).loc, target.entry(reg).loc) {
                (Loc::Host(from), Loc::Host(to)) if from != to => self.evict(em, reg),
                _ => (),
            }
        }

        // registers the target keeps resident
        for reg in LogicalReg::roots() {
            let wanted = *target.entry(reg);
            let Loc::Host(to) = wanted.loc else {
                continue;
            };

            let current = *self.entry(reg);
            if current.loc != Loc::Host(to) {
                match self.host_state(to) {
                    HostState::Free | HostState::Reserved => (),
                    state => panic!("{to:?} is still {state:?} while flushing {reg:?}"),
                }

                match current.loc {
                    Loc::Imm(value) => em.imm(to, value),
                    Loc::Mem => {
                        em.load(to, reg.slot());
                        if reg.is_acc() {
                            em.extend(to, 40, true);
                        }
                    }
                    Loc::Host(_) => unreachable!(),
                }

                self.set_host(to, HostState::Guest(reg));
                let entry = self.entry_mut(reg);
                entry.loc = Loc::Host(to);
                entry.shift = 0;
            }

            if self.entry(reg).dirty && !wanted.dirty {
                self.writeback(em, reg);
            }

            self.rotate(em, reg, wanted.shift);
        }

        // bookkeeping
        for (entry, wanted) in self.entries.iter_mut().zip(&target.entries) {
            entry.dirty = wanted.dirty;
            entry.used = wanted.used;
            entry.last_use = wanted.last_use;
        }

        self.use_ctr = self.use_ctr.max(target.use_ctr);
        for (state, wanted) in self.host.iter_mut().zip(&target.host) {
            match (*state, *wanted) {
                (HostState::Temp, HostState::Free) | (HostState::Free, HostState::Temp) => {
                    *state = *wanted;
                }
                _ => (),
            }
        }

        assert_eq!(self.entries, target.entries, "register cache diverged");
        assert_eq!(self.host, target.host, "host registers diverged");
        target.temporary = false;
    }
}

impl Drop for RegCache {
    fn drop(&mut self) {
        debug_assert!(
            !self.temporary || std::thread::panicking(),
            "register cache snapshot dropped without being merged"
        );
    }
}
