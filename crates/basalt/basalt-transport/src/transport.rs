//! Ring discipline and the locked cursor.

use std::slice;
use std::time::Duration;

use basalt_arena::{Arena, ArenaMode};
use basalt_sync::{Acquire, Cnd, Mtx, SyncError, TimeMono};

use crate::layout::{FRAME_HDR_SIZE, FrameHdr, MAGIC, State, TransportHdr, align8, workspace_off};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("arena is not a valid transport: {0}")]
    BadArena(&'static str),

    #[error("frame does not fit in the arena")]
    FrameTooLarge,

    #[error("cursor does not reference a live frame")]
    InvalidCursor,

    #[error("arena is mapped read-only")]
    ReadOnly,

    #[error("arena is not shared; blocking waits are unavailable")]
    NotShared,

    #[error("wait deadline expired")]
    TimedOut,

    #[error("transport lock was abandoned in an unrecoverable state")]
    Unrecoverable,

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// A ring log overlaid on an arena.
///
/// Constructing a transport runs the attach protocol: a zeroed arena is
/// stamped with the header, a crashed writer's half-finished append is
/// rolled back, and anything else is rejected as [`TransportError::BadArena`].
pub struct Transport {
    arena: Arena,
}

impl Transport {
    pub fn new(arena: Arena) -> Result<Transport, TransportError> {
        if (arena.len() as u64) < workspace_off() + FRAME_HDR_SIZE {
            return Err(TransportError::BadArena("arena smaller than transport header"));
        }
        let transport = Transport { arena };
        transport.init()?;
        Ok(transport)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    fn hdr(&self) -> *mut TransportHdr {
        self.arena.as_ptr().cast()
    }

    fn mtx(&self) -> &Mtx {
        unsafe { &(*self.hdr()).mtx }
    }

    fn cnd(&self) -> &Cnd {
        unsafe { &(*self.hdr()).cnd }
    }

    fn frame_at(&self, off: u64) -> *mut FrameHdr {
        unsafe { self.arena.as_ptr().add(off as usize).cast() }
    }

    fn init(&self) -> Result<(), TransportError> {
        // Sanity before touching the mutex: locking a garbage header is
        // meaningless.
        let magic = unsafe { (*self.hdr()).magic };
        if magic != 0 && magic != MAGIC {
            return Err(TransportError::BadArena("magic mismatch"));
        }

        if self.arena.mode() == ArenaMode::ReadOnly {
            if magic != MAGIC {
                return Err(TransportError::BadArena("read-only arena was never initialized"));
            }
            return self.validate();
        }

        let locked = self.lock()?;
        let res = self.init_locked();
        drop(locked);
        res
    }

    fn init_locked(&self) -> Result<(), TransportError> {
        unsafe {
            let hdr = self.hdr();
            if (*hdr).magic != MAGIC {
                (*hdr).committed = State::default();
                (*hdr).working = State::default();
                (*hdr).magic = MAGIC;
                return Ok(());
            }
            self.validate()?;
            if (*hdr).working != (*hdr).committed {
                // A writer died between alloc and commit; discard its
                // working view.
                tracing::warn!("rolling back aborted append");
                (*hdr).working = (*hdr).committed;
            }
        }
        self.resync_seqs();
        Ok(())
    }

    fn validate(&self) -> Result<(), TransportError> {
        let c = unsafe { (*self.hdr()).committed };
        let len = self.arena.len() as u64;
        let ws = workspace_off();

        // Catches arena files whose size changed after first init.
        if c.high_water_mark > len {
            return Err(TransportError::BadArena("high water mark beyond arena"));
        }
        if (c.off_head == 0) != (c.off_tail == 0) {
            return Err(TransportError::BadArena("half-empty committed offsets"));
        }
        for off in [c.off_head, c.off_tail] {
            if off != 0 && (off % 8 != 0 || off < ws || off + FRAME_HDR_SIZE > len) {
                return Err(TransportError::BadArena("frame offset out of range"));
            }
        }
        Ok(())
    }

    /// The per-frame seq is authoritative; refresh the header pair when a
    /// half-written update left it behind.
    fn resync_seqs(&self) {
        unsafe {
            let hdr = self.hdr();
            let c = (*hdr).committed;
            if c.off_head == 0 {
                return;
            }
            let low = (*self.frame_at(c.off_head)).seq;
            let high = (*self.frame_at(c.off_tail)).seq;
            if c.seq_low != low || c.seq_high != high {
                (*hdr).committed.seq_low = low;
                (*hdr).committed.seq_high = high;
                (*hdr).working.seq_low = low;
                (*hdr).working.seq_high = high;
            }
        }
    }

    /// Acquires the transport, blocking on the in-arena mutex for shared
    /// arenas. A dead previous owner is repaired transparently: rolling the
    /// working state back to the committed state *is* the repair, after
    /// which the mutex is marked consistent.
    pub fn lock(&self) -> Result<LockedTransport<'_>, TransportError> {
        if self.arena.mode() == ArenaMode::Shared {
            match self.mtx().lock() {
                Ok(Acquire::Clean) => {}
                Ok(Acquire::OwnerDead) => self.repair(),
                Err(SyncError::Unrecoverable) => return Err(TransportError::Unrecoverable),
                Err(e) => return Err(TransportError::Sync(e)),
            }
        }
        Ok(LockedTransport { transport: self, off: 0 })
    }

    fn repair(&self) {
        tracing::warn!("transport lock recovered from a dead owner; rolling back working state");
        unsafe {
            let hdr = self.hdr();
            (*hdr).working = (*hdr).committed;
        }
        let _ = self.mtx().consistent();
    }
}

/// A frame read from the log.
pub struct FrameRef<'a> {
    pub seq: u64,
    pub payload: &'a [u8],
}

/// A freshly allocated, not-yet-committed frame.
pub struct FrameMut<'a> {
    pub seq: u64,
    pub payload: &'a mut [u8],
}

/// A cursor over the log, holding the transport mutex for its lifetime.
///
/// The mutex is released on every exit path, including panics, when the
/// cursor drops. Readers consult committed state only; [`alloc`] and
/// [`resize`] mutate working state, which becomes visible at [`commit`].
///
/// [`alloc`]: LockedTransport::alloc
/// [`resize`]: LockedTransport::resize
/// [`commit`]: LockedTransport::commit
pub struct LockedTransport<'t> {
    transport: &'t Transport,
    off: u64,
}

impl Drop for LockedTransport<'_> {
    fn drop(&mut self) {
        if self.transport.arena.mode() == ArenaMode::Shared {
            let _ = self.transport.mtx().unlock();
        }
    }
}

impl<'t> LockedTransport<'t> {
    fn committed(&self) -> State {
        unsafe { (*self.transport.hdr()).committed }
    }

    fn working(&self) -> State {
        unsafe { (*self.transport.hdr()).working }
    }

    fn set_working(&mut self, w: State) {
        unsafe { (*self.transport.hdr()).working = w }
    }

    fn frame_end(&self, off: u64) -> u64 {
        off + FRAME_HDR_SIZE + unsafe { (*self.transport.frame_at(off)).payload_size }
    }

    fn require_writable(&self) -> Result<(), TransportError> {
        if self.transport.arena.mode() == ArenaMode::ReadOnly {
            Err(TransportError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub fn empty(&self) -> bool {
        self.committed().off_head == 0
    }

    pub fn seq_low(&self) -> u64 {
        self.committed().seq_low
    }

    pub fn seq_high(&self) -> u64 {
        self.committed().seq_high
    }

    /// Bytes between the committed head and the high-water mark.
    pub fn used_space(&self) -> u64 {
        let c = self.committed();
        if c.off_head == 0 {
            0
        } else {
            c.high_water_mark - c.off_head
        }
    }

    /// Whether the cursor still references a live committed frame.
    ///
    /// Eviction can invalidate a cursor at any commit; every operation
    /// rechecks this before dereferencing.
    pub fn ptr_valid(&self) -> bool {
        let c = self.committed();
        if self.off == 0 || c.off_head == 0 {
            return false;
        }
        let len = self.transport.arena.len() as u64;
        if self.off % 8 != 0 || self.off < workspace_off() || self.off + FRAME_HDR_SIZE > len {
            return false;
        }
        // The header bytes may be stale garbage if the frame was evicted
        // and overwritten; every field is range-checked before use.
        let hdr = unsafe { *self.transport.frame_at(self.off) };
        match (self.off + FRAME_HDR_SIZE).checked_add(hdr.payload_size) {
            Some(end) if end <= len => {}
            _ => return false,
        }
        c.seq_low <= hdr.seq && hdr.seq <= c.seq_high
    }

    /// The frame under the cursor.
    pub fn frame(&self) -> Result<FrameRef<'_>, TransportError> {
        if !self.ptr_valid() {
            return Err(TransportError::InvalidCursor);
        }
        let hdr = unsafe { *self.transport.frame_at(self.off) };
        let payload = unsafe {
            slice::from_raw_parts(
                self.transport
                    .arena
                    .as_ptr()
                    .add((self.off + FRAME_HDR_SIZE) as usize),
                hdr.payload_size as usize,
            )
        };
        Ok(FrameRef { seq: hdr.seq, payload })
    }

    pub fn jump_head(&mut self) -> Result<(), TransportError> {
        let c = self.committed();
        if c.off_head == 0 {
            return Err(TransportError::InvalidCursor);
        }
        self.off = c.off_head;
        Ok(())
    }

    pub fn jump_tail(&mut self) -> Result<(), TransportError> {
        let c = self.committed();
        if c.off_tail == 0 {
            return Err(TransportError::InvalidCursor);
        }
        self.off = c.off_tail;
        Ok(())
    }

    /// True when [`next`](LockedTransport::next) would advance. An unset or
    /// evicted cursor re-enters at the head, so any non-empty log has a next
    /// frame for it.
    pub fn has_next(&self) -> bool {
        if self.empty() {
            return false;
        }
        if !self.ptr_valid() {
            return true;
        }
        unsafe { (*self.transport.frame_at(self.off)).next_off != 0 }
    }

    pub fn next(&mut self) -> Result<(), TransportError> {
        if self.empty() {
            return Err(TransportError::InvalidCursor);
        }
        if !self.ptr_valid() {
            return self.jump_head();
        }
        let next = unsafe { (*self.transport.frame_at(self.off)).next_off };
        if next == 0 {
            return Err(TransportError::InvalidCursor);
        }
        self.off = next;
        Ok(())
    }

    pub fn has_prev(&self) -> bool {
        self.ptr_valid() && unsafe { (*self.transport.frame_at(self.off)).prev_off != 0 }
    }

    pub fn prev(&mut self) -> Result<(), TransportError> {
        if !self.ptr_valid() {
            return Err(TransportError::InvalidCursor);
        }
        let prev = unsafe { (*self.transport.frame_at(self.off)).prev_off };
        if prev == 0 {
            return Err(TransportError::InvalidCursor);
        }
        self.off = prev;
        Ok(())
    }

    /// The cursor's raw offset, for restoring a position across relocks.
    pub fn cursor_off(&self) -> u64 {
        self.off
    }

    /// Restores a previously saved position. Returns whether the frame is
    /// still live; a stale position simply re-enters at the head on the
    /// next [`next`](LockedTransport::next).
    pub fn seek(&mut self, off: u64) -> bool {
        self.off = off;
        self.ptr_valid()
    }

    fn placement(&self, w: &State, frame_size: u64, ws: u64, len: u64) -> u64 {
        if w.off_head == 0 {
            return ws;
        }
        let after = align8(self.frame_end(w.off_tail));
        if after + frame_size > len { ws } else { after }
    }

    /// Does `[off, off + frame_size)` intersect any live frame of `w`?
    ///
    /// Live frames occupy one address span when head <= tail, or two once
    /// the ring has wrapped: the old span `[head, high_water_mark)` and the
    /// young span `[workspace, tail_end)`.
    fn conflicts(&self, w: &State, off: u64, frame_size: u64, ws: u64) -> bool {
        fn overlap(a0: u64, a1: u64, b0: u64, b1: u64) -> bool {
            a0 < b1 && b0 < a1
        }
        let r0 = off;
        let r1 = off + frame_size;
        let tail_end = self.frame_end(w.off_tail);
        if w.off_head <= w.off_tail {
            overlap(r0, r1, w.off_head, tail_end)
        } else {
            overlap(r0, r1, w.off_head, w.high_water_mark) || overlap(r0, r1, ws, tail_end)
        }
    }

    fn evict_head(&self, w: &mut State) {
        let next = unsafe { (*self.transport.frame_at(w.off_head)).next_off };
        w.seq_low += 1;
        if next == 0 {
            w.off_head = 0;
            w.off_tail = 0;
        } else {
            w.off_head = next;
            unsafe { (*self.transport.frame_at(next)).prev_off = 0 };
        }
    }

    /// Reserves a frame with a `size`-byte payload in the working state,
    /// evicting the oldest frames if the ring is out of room.
    ///
    /// The frame is invisible to readers until [`commit`]. The new frame is
    /// placed after the current tail, rotating to just past the header when
    /// the end of the arena is reached.
    ///
    /// [`commit`]: LockedTransport::commit
    pub fn alloc(&mut self, size: usize) -> Result<FrameMut<'_>, TransportError> {
        self.require_writable()?;
        let size = size as u64;
        let ws = workspace_off();
        let len = self.transport.arena.len() as u64;
        let frame_size = FRAME_HDR_SIZE + size;

        if ws + align8(frame_size) > len {
            return Err(TransportError::FrameTooLarge);
        }

        let mut w = self.working();
        let off = self.placement(&w, frame_size, ws, len);

        while w.off_head != 0 && self.conflicts(&w, off, frame_size, ws) {
            self.evict_head(&mut w);
        }

        let seq = w.seq_high + 1;
        let prev = w.off_tail;
        unsafe {
            *self.transport.frame_at(off) = FrameHdr {
                seq,
                prev_off: prev,
                next_off: 0,
                payload_size: size,
            };
            if prev != 0 {
                (*self.transport.frame_at(prev)).next_off = off;
            }
        }
        if w.off_head == 0 {
            w.off_head = off;
            w.seq_low = seq;
        }
        w.off_tail = off;
        w.seq_high = seq;
        let end = off + frame_size;
        if end > w.high_water_mark {
            w.high_water_mark = end;
        }
        self.set_working(w);

        let payload = unsafe {
            slice::from_raw_parts_mut(
                self.transport
                    .arena
                    .as_ptr()
                    .add((off + FRAME_HDR_SIZE) as usize),
                size as usize,
            )
        };
        Ok(FrameMut { seq, payload })
    }

    /// Would [`alloc`](LockedTransport::alloc) with this payload size evict
    /// at least one frame?
    pub fn alloc_evicts(&self, size: usize) -> Result<bool, TransportError> {
        let size = size as u64;
        let ws = workspace_off();
        let len = self.transport.arena.len() as u64;
        let frame_size = FRAME_HDR_SIZE + size;

        if ws + align8(frame_size) > len {
            return Err(TransportError::FrameTooLarge);
        }

        let w = self.working();
        if w.off_head == 0 {
            return Ok(false);
        }
        let off = self.placement(&w, frame_size, ws, len);
        Ok(self.conflicts(&w, off, frame_size, ws))
    }

    /// Publishes the working state and wakes all waiters.
    pub fn commit(&mut self) -> Result<(), TransportError> {
        self.require_writable()?;
        unsafe {
            let hdr = self.transport.hdr();
            (*hdr).committed = (*hdr).working;
        }
        self.notify_all()
    }

    /// Wakes every waiter on this transport's condition variable without
    /// committing anything. Used to nudge workers at shutdown.
    pub fn notify_all(&self) -> Result<(), TransportError> {
        if self.transport.arena.mode() == ArenaMode::Shared {
            self.transport
                .cnd()
                .broadcast(self.transport.mtx())
                .map_err(TransportError::Sync)?;
        }
        Ok(())
    }

    /// Shrinks the working log until it occupies at most `max_used` bytes,
    /// evicting oldest frames. Cannot grow beyond the arena.
    pub fn resize(&mut self, max_used: u64) -> Result<(), TransportError> {
        self.require_writable()?;
        let ws = workspace_off();
        if max_used > self.transport.arena.len() as u64 - ws {
            return Err(TransportError::FrameTooLarge);
        }
        let mut w = self.working();
        while w.off_head != 0 && w.high_water_mark - w.off_head > max_used {
            self.evict_head(&mut w);
        }
        self.set_working(w);
        Ok(())
    }

    /// Blocks until `pred` is satisfied. The predicate runs under the lock;
    /// the lock is released while parked on the condition variable.
    pub fn wait(&mut self, pred: impl FnMut(&Self) -> bool) -> Result<(), TransportError> {
        self.wait_impl(pred, None)
    }

    pub fn wait_for(
        &mut self,
        pred: impl FnMut(&Self) -> bool,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.wait_impl(pred, Some(TimeMono::after(timeout)))
    }

    pub fn wait_until(
        &mut self,
        pred: impl FnMut(&Self) -> bool,
        deadline: TimeMono,
    ) -> Result<(), TransportError> {
        self.wait_impl(pred, Some(deadline))
    }

    fn wait_impl(
        &mut self,
        mut pred: impl FnMut(&Self) -> bool,
        deadline: Option<TimeMono>,
    ) -> Result<(), TransportError> {
        loop {
            if pred(self) {
                return Ok(());
            }
            if self.transport.arena.mode() != ArenaMode::Shared {
                return Err(TransportError::NotShared);
            }
            let res = match deadline {
                Some(d) => self.transport.cnd().timedwait(self.transport.mtx(), d),
                None => self.transport.cnd().wait(self.transport.mtx()),
            };
            match res {
                Ok(Acquire::Clean) => {}
                Ok(Acquire::OwnerDead) => self.transport.repair(),
                Err(SyncError::TimedOut) => return Err(TransportError::TimedOut),
                Err(SyncError::Unrecoverable) => return Err(TransportError::Unrecoverable),
                Err(e) => return Err(TransportError::Sync(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn shared_heap(len: usize) -> Transport {
        Transport::new(Arena::heap(len, ArenaMode::Shared)).unwrap()
    }

    fn commit_payload(t: &Transport, payload: &[u8]) {
        let mut lt = t.lock().unwrap();
        lt.alloc(payload.len()).unwrap().payload.copy_from_slice(payload);
        lt.commit().unwrap();
    }

    #[test]
    fn fresh_arena_is_empty() {
        let t = shared_heap(4096);
        let lt = t.lock().unwrap();
        assert!(lt.empty());
        assert_eq!(lt.used_space(), 0);
        assert!(!lt.has_next());
    }

    #[test]
    fn single_producer_single_consumer() {
        let t = shared_heap(4096);
        for payload in [&b"a"[..], b"bb", b"ccc"] {
            commit_payload(&t, payload);
        }

        let mut lt = t.lock().unwrap();
        lt.jump_head().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"a");
        lt.next().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"bb");
        lt.next().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"ccc");
        assert!(!lt.has_next());
        assert_eq!(lt.seq_low(), 1);
        assert_eq!(lt.seq_high(), 3);
    }

    #[test]
    fn prev_walks_backwards() {
        let t = shared_heap(4096);
        commit_payload(&t, b"one");
        commit_payload(&t, b"two");

        let mut lt = t.lock().unwrap();
        lt.jump_tail().unwrap();
        assert!(lt.has_prev());
        lt.prev().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"one");
        assert!(!lt.has_prev());
        assert_eq!(lt.prev(), Err(TransportError::InvalidCursor));
    }

    // Arena sized so exactly two 100-byte-payload frames fit behind the
    // header: frames at 120 and 256, a third would end at 524.
    const TWO_FRAME_ARENA: usize = 520;

    #[test]
    fn eviction_keeps_newest_frames() {
        let t = shared_heap(TWO_FRAME_ARENA);
        for i in 1..=5u8 {
            commit_payload(&t, &[i; 100]);
        }

        let mut lt = t.lock().unwrap();
        assert_eq!(lt.seq_low(), 4);
        assert_eq!(lt.seq_high(), 5);
        lt.jump_head().unwrap();
        assert_eq!(lt.frame().unwrap().payload, &[4u8; 100][..]);
        lt.next().unwrap();
        assert_eq!(lt.frame().unwrap().payload, &[5u8; 100][..]);
        assert!(!lt.has_next());
    }

    #[test]
    fn alloc_evicts_predicts_eviction() {
        let t = shared_heap(TWO_FRAME_ARENA);
        commit_payload(&t, &[1; 100]);

        let lt = t.lock().unwrap();
        assert!(!lt.alloc_evicts(100).unwrap());
        drop(lt);

        commit_payload(&t, &[2; 100]);
        let lt = t.lock().unwrap();
        assert!(lt.alloc_evicts(100).unwrap());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let t = shared_heap(4096);
        let mut lt = t.lock().unwrap();
        assert!(matches!(lt.alloc(1 << 20), Err(TransportError::FrameTooLarge)));
        assert_eq!(lt.alloc_evicts(1 << 20), Err(TransportError::FrameTooLarge));
    }

    #[test]
    fn evicted_cursor_reenters_at_head() {
        let t = shared_heap(TWO_FRAME_ARENA);
        commit_payload(&t, &[1; 8]);
        commit_payload(&t, &[2; 100]);

        let mut lt = t.lock().unwrap();
        lt.jump_tail().unwrap();
        let stale = lt.cursor_off();
        drop(lt);

        // One large frame wraps, evicts everything, and overwrites the old
        // frame bytes, so the stale offset now points into payload garbage.
        commit_payload(&t, &[0xAA; 300]);

        let mut lt = t.lock().unwrap();
        assert!(!lt.seek(stale));
        assert!(lt.has_next());
        lt.next().unwrap();
        assert_eq!(lt.frame().unwrap().seq, lt.seq_low());
        assert_eq!(lt.frame().unwrap().payload, &[0xAA; 300][..]);
    }

    #[test]
    fn resize_evicts_oldest() {
        let t = shared_heap(4096);
        for i in 1..=3u8 {
            commit_payload(&t, &[i; 64]);
        }

        let mut lt = t.lock().unwrap();
        let used = lt.used_space();
        lt.resize(used - 1).unwrap();
        lt.commit().unwrap();
        assert!(lt.seq_low() > 1);
        assert_eq!(lt.seq_high(), 3);

        lt.resize(0).unwrap();
        lt.commit().unwrap();
        assert!(lt.empty());
        drop(lt);

        // Sequence numbering continues after a resize to empty.
        commit_payload(&t, b"x");
        let lt = t.lock().unwrap();
        assert_eq!(lt.seq_high(), 4);
    }

    #[test]
    fn wait_for_times_out_without_data() {
        let t = shared_heap(4096);
        let mut lt = t.lock().unwrap();
        let res = lt.wait_for(|l| l.has_next(), Duration::from_millis(50));
        assert_eq!(res, Err(TransportError::TimedOut));
    }

    #[test]
    fn wait_observes_commit_from_other_thread() {
        let t = Arc::new(shared_heap(4096));

        let producer = {
            let t = Arc::clone(&t);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                commit_payload(&t, b"ping");
            })
        };

        let mut lt = t.lock().unwrap();
        lt.wait(|l| !l.empty()).unwrap();
        lt.jump_head().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"ping");
        drop(lt);

        producer.join().unwrap();
    }

    #[test]
    fn aborted_append_rolls_back_on_next_lock() {
        let t = Arc::new(shared_heap(4096));
        commit_payload(&t, b"kept");

        // Simulate a writer dying mid-append: alloc without commit, then
        // exit the thread with the lock still held. The robust list hands
        // the next locker an owner-died acquisition, which repairs by
        // rolling back the working state.
        let crasher = Arc::clone(&t);
        std::thread::spawn(move || {
            let mut lt = crasher.lock().unwrap();
            let frame = lt.alloc(50).unwrap();
            frame.payload.fill(0xEE);
            std::mem::forget(lt);
        })
        .join()
        .unwrap();

        let mut lt = t.lock().unwrap();
        assert_eq!(lt.seq_high(), 1);
        lt.jump_tail().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"kept");
        assert!(!lt.has_next());
        drop(lt);

        // The transport is fully usable afterwards.
        commit_payload(&t, b"after");
        let mut lt = t.lock().unwrap();
        assert_eq!(lt.seq_high(), 2);
        lt.jump_tail().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"after");
    }

    #[test]
    fn exclusive_arena_skips_locking_but_works() {
        let t = Transport::new(Arena::heap(4096, ArenaMode::Exclusive)).unwrap();
        commit_payload(&t, b"solo");

        let mut lt = t.lock().unwrap();
        lt.jump_head().unwrap();
        assert_eq!(lt.frame().unwrap().payload, b"solo");
        let res = lt.wait_for(|l| l.has_next(), Duration::from_millis(1));
        assert_eq!(res, Err(TransportError::NotShared));
    }

    #[test]
    fn readonly_heap_arena_is_rejected() {
        // Never initialized by a writer, so there is nothing valid to read.
        let res = Transport::new(Arena::heap(4096, ArenaMode::ReadOnly));
        assert!(matches!(res, Err(TransportError::BadArena(_))));
    }

    #[test]
    fn tiny_arena_is_rejected() {
        let res = Transport::new(Arena::heap(64, ArenaMode::Shared));
        assert!(matches!(res, Err(TransportError::BadArena(_))));
    }

    #[test]
    fn garbage_magic_is_rejected() {
        let arena = Arena::heap(4096, ArenaMode::Shared);
        unsafe { *(arena.as_ptr() as *mut u64) = 0xDEAD_BEEF };
        let res = Transport::new(arena);
        assert!(matches!(res, Err(TransportError::BadArena(_))));
    }
}
