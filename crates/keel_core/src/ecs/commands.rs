// commands.rs - Deferred structural-change buffer
//
// Systems running on worker threads must never mutate the registry directly:
// structural changes move rows and invalidate the chunk memory other threads
// are reading. They record commands here instead; the thread that owns the
// registry drains and applies them at the phase boundary.
//
// Concurrency contract: any number of threads may record concurrently.
// Recording takes `&self` (atomic index claims), draining and resetting take
// `&mut self`, so the single-consumer rule is enforced by the borrow checker
// instead of by convention. Visibility of recorded data at the drain point
// comes from the phase barrier (worker join) that hands `&mut self` back.

use crate::config::StorageSettings;
use crate::ecs::{Component, ComponentType, Entity};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    AddComponent,
    RemoveComponent,
    DestroyEntity,
}

/// Byte range of a recorded payload inside the bump arena.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PayloadSlice {
    start: u32,
    len: u32,
}

/// One recorded structural change.
#[derive(Clone, Copy, Debug)]
pub struct CommandRecord {
    pub entity: Entity,
    pub kind: CommandKind,
    /// Present for component commands, absent for entity destruction.
    pub component: Option<ComponentType>,
    pub(crate) payload: Option<PayloadSlice>,
}

#[derive(Debug, Error)]
pub enum CommandBufferError {
    #[error("command buffer capacity must be non-zero")]
    ZeroCommandCapacity,
    #[error("command payload arena must be non-zero")]
    ZeroPayloadCapacity,
}

#[repr(transparent)]
struct Slot(UnsafeCell<MaybeUninit<CommandRecord>>);

// SAFETY: each slot is written at most once per frame, by the single thread
// that claimed its index via fetch_add, and read only once `&mut self`
// proves all recorders are gone.
unsafe impl Sync for Slot {}

/// Thread-safe bump allocator for command payload bytes.
struct BumpArena {
    bytes: Box<[UnsafeCell<u8>]>,
    head: AtomicUsize,
}

// SAFETY: byte ranges are claimed exclusively via fetch_add before being
// written; reads happen only behind the drain's exclusive borrow.
unsafe impl Sync for BumpArena {}

impl BumpArena {
    fn new(capacity: usize) -> Self {
        let bytes: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();
        Self {
            bytes: bytes.into_boxed_slice(),
            head: AtomicUsize::new(0),
        }
    }

    /// Copy `src` into freshly claimed arena space. None if the arena is
    /// exhausted for this frame.
    fn alloc(&self, src: &[u8]) -> Option<PayloadSlice> {
        if src.is_empty() {
            return Some(PayloadSlice { start: 0, len: 0 });
        }
        let start = self.head.fetch_add(src.len(), Ordering::Relaxed);
        let end = start.checked_add(src.len())?;
        if end > self.bytes.len() {
            return None;
        }
        // SAFETY: [start, end) was claimed exclusively by the fetch_add
        // above; UnsafeCell<u8> has u8's layout.
        unsafe {
            let dst = self.bytes.as_ptr().add(start) as *mut u8;
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }
        Some(PayloadSlice {
            start: start as u32,
            len: src.len() as u32,
        })
    }

    /// Read back a recorded payload. Caller guarantees no recorder is
    /// running (the drain's `&mut` borrow).
    fn get(&self, slice: PayloadSlice) -> &[u8] {
        // SAFETY: the range was fully written during recording and nothing
        // writes it between drain and reset.
        unsafe {
            std::slice::from_raw_parts(
                (self.bytes.as_ptr() as *const u8).add(slice.start as usize),
                slice.len as usize,
            )
        }
    }

    fn reset(&mut self) {
        *self.head.get_mut() = 0;
    }
}

/// Fixed-capacity multi-producer buffer of deferred structural changes.
pub struct ComponentCommands {
    slots: Box<[Slot]>,
    len: AtomicUsize,
    dropped: AtomicUsize,
    payload: BumpArena,
}

impl ComponentCommands {
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, CommandBufferError> {
        Self::with_capacity(settings.command_capacity, settings.command_payload_bytes)
    }

    pub fn with_capacity(
        commands: usize,
        payload_bytes: usize,
    ) -> Result<Self, CommandBufferError> {
        if commands == 0 {
            return Err(CommandBufferError::ZeroCommandCapacity);
        }
        if payload_bytes == 0 {
            return Err(CommandBufferError::ZeroPayloadCapacity);
        }
        let slots: Vec<Slot> = (0..commands)
            .map(|_| Slot(UnsafeCell::new(MaybeUninit::uninit())))
            .collect();
        Ok(Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            payload: BumpArena::new(payload_bytes),
        })
    }

    /// Record a deferred component add. The value is copied into the
    /// payload arena immediately; the caller keeps nothing alive.
    pub fn add_component<T: Component>(&self, entity: Entity, value: T) -> bool {
        self.add_component_raw(entity, ComponentType::of::<T>(), bytemuck::bytes_of(&value))
    }

    /// Raw-byte variant of [`ComponentCommands::add_component`].
    pub fn add_component_raw(&self, entity: Entity, ty: ComponentType, bytes: &[u8]) -> bool {
        debug_assert_eq!(bytes.len(), ty.size as usize, "payload/stride mismatch");
        let Some(payload) = self.payload.alloc(bytes) else {
            return self.drop_command("payload arena full");
        };
        self.push(CommandRecord {
            entity,
            kind: CommandKind::AddComponent,
            component: Some(ty),
            payload: Some(payload),
        })
    }

    pub fn remove_component<T: Component>(&self, entity: Entity) -> bool {
        self.remove_component_raw(entity, ComponentType::of::<T>())
    }

    pub fn remove_component_raw(&self, entity: Entity, ty: ComponentType) -> bool {
        self.push(CommandRecord {
            entity,
            kind: CommandKind::RemoveComponent,
            component: Some(ty),
            payload: None,
        })
    }

    pub fn destroy_entity(&self, entity: Entity) -> bool {
        self.push(CommandRecord {
            entity,
            kind: CommandKind::DestroyEntity,
            component: None,
            payload: None,
        })
    }

    /// Commands recorded so far this frame.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commands rejected for capacity since the last reset.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Read back everything recorded, in insertion order.
    ///
    /// Requires `&mut self`: taking it proves every recording thread has
    /// been joined, which is also what makes their writes visible here.
    pub fn drain(&mut self) -> DrainedCommands<'_> {
        let len = (*self.len.get_mut()).min(self.slots.len());
        // SAFETY: slots 0..len were each fully initialized by the recorder
        // that claimed them; Slot is transparent over the record.
        let records =
            unsafe { std::slice::from_raw_parts(self.slots.as_ptr() as *const CommandRecord, len) };
        DrainedCommands {
            records,
            payload: &self.payload,
        }
    }

    /// Forget all recorded commands and reclaim the payload arena.
    /// Call once per frame after the drained commands are applied.
    pub fn reset(&mut self) {
        *self.len.get_mut() = 0;
        *self.dropped.get_mut() = 0;
        self.payload.reset();
    }

    fn push(&self, record: CommandRecord) -> bool {
        let idx = self.len.fetch_add(1, Ordering::Relaxed);
        if idx >= self.slots.len() {
            return self.drop_command("command buffer full");
        }
        // SAFETY: idx was claimed exclusively by the fetch_add above.
        unsafe {
            (*self.slots[idx].0.get()).write(record);
        }
        true
    }

    fn drop_command(&self, reason: &'static str) -> bool {
        // Log the first drop of the frame; after that just count.
        if self.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
            error!(reason, "dropping structural command; capacity exhausted");
        }
        false
    }
}

/// Read-only view of one frame's recorded commands.
pub struct DrainedCommands<'a> {
    records: &'a [CommandRecord],
    payload: &'a BumpArena,
}

impl<'a> DrainedCommands<'a> {
    pub fn records(&self) -> &'a [CommandRecord] {
        self.records
    }

    /// The payload bytes recorded with a command, if it carried any.
    pub fn payload_of(&self, record: &CommandRecord) -> Option<&'a [u8]> {
        record.payload.map(|slice| self.payload.get(slice))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Impulse {
        x: f32,
        y: f32,
    }
    crate::define_component!(Impulse, 89, "Impulse");

    fn entity(index: u32) -> Entity {
        Entity::from_bits(index as u64)
    }

    #[test]
    fn commands_drain_in_insertion_order() {
        let mut commands = ComponentCommands::with_capacity(16, 1024).unwrap();
        assert!(commands.add_component(entity(0), Impulse { x: 1.0, y: 2.0 }));
        assert!(commands.remove_component::<Impulse>(entity(1)));
        assert!(commands.destroy_entity(entity(2)));

        let drained = commands.drain();
        let records = drained.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, CommandKind::AddComponent);
        assert_eq!(records[1].kind, CommandKind::RemoveComponent);
        assert_eq!(records[2].kind, CommandKind::DestroyEntity);
        assert_eq!(records[2].entity, entity(2));

        let payload = drained.payload_of(&records[0]).unwrap();
        let value: Impulse = bytemuck::pod_read_unaligned(payload);
        assert_eq!(value, Impulse { x: 1.0, y: 2.0 });
        assert!(drained.payload_of(&records[1]).is_none());
    }

    #[test]
    fn overflow_drops_and_counts() {
        let mut commands = ComponentCommands::with_capacity(2, 1024).unwrap();
        assert!(commands.destroy_entity(entity(0)));
        assert!(commands.destroy_entity(entity(1)));
        assert!(!commands.destroy_entity(entity(2)));
        assert_eq!(commands.len(), 2);
        assert_eq!(commands.dropped(), 1);

        commands.reset();
        assert_eq!(commands.len(), 0);
        assert_eq!(commands.dropped(), 0);
        assert!(commands.destroy_entity(entity(3)));
    }

    #[test]
    fn payload_arena_exhaustion_drops_the_command() {
        let commands = ComponentCommands::with_capacity(16, 4).unwrap();
        assert!(!commands.add_component(entity(0), Impulse { x: 0.0, y: 0.0 }));
        assert_eq!(commands.len(), 0);
        assert_eq!(commands.dropped(), 1);
    }

    #[test]
    fn concurrent_recording_loses_nothing() {
        use rayon::prelude::*;

        let mut commands = ComponentCommands::with_capacity(1024, 64 * 1024).unwrap();
        (0u32..1024).into_par_iter().for_each(|i| {
            let accepted = if i % 2 == 0 {
                commands.add_component(entity(i), Impulse { x: i as f32, y: 0.0 })
            } else {
                commands.destroy_entity(entity(i))
            };
            assert!(accepted);
        });

        let drained = commands.drain();
        assert_eq!(drained.len(), 1024);

        let mut seen: Vec<u32> = drained
            .records()
            .iter()
            .map(|record| record.entity.index())
            .collect();
        seen.sort_unstable();
        let expected: Vec<u32> = (0..1024).collect();
        assert_eq!(seen, expected);

        // Every add command's payload survived intact.
        for record in drained.records() {
            if record.kind == CommandKind::AddComponent {
                let value: Impulse =
                    bytemuck::pod_read_unaligned(drained.payload_of(record).unwrap());
                assert_eq!(value.x, record.entity.index() as f32);
            }
        }
    }
}
