use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// Opaque handle handed out to VA clients.
pub type ResourceId = u32;

/// A driver object tracked by a [`Registry`].
pub trait Resource: Send + Sync {
    fn id(&self) -> ResourceId;
}

/// Thread-safe table of live objects of one kind.
///
/// Ids are dense: after a destroy, the lowest freed id is handed out again
/// before the counter moves past ids that are still live. The table lock is
/// held only for bookkeeping. [`create`](Self::create) reserves its id under
/// the lock and runs the constructor without it, so a constructor may call
/// back into the same registry and a slow constructor does not stall lookups.
///
/// Looking up or destroying an id that is not live is a caller bug and panics;
/// untrusted ids are screened with [`exists`](Self::exists) or
/// [`find`](Self::find) first.
pub struct Registry<T> {
    inner: Mutex<RegistryInner<T>>,
}

struct RegistryInner<T> {
    objects: Vec<Arc<T>>,
    /// Ids handed to constructors that have not returned yet.
    reserved: Vec<ResourceId>,
    next_id: ResourceId,
}

impl<T: Resource> RegistryInner<T> {
    fn exists(&self, id: ResourceId) -> bool {
        self.objects.iter().any(|o| o.id() == id)
    }

    fn taken(&self, id: ResourceId) -> bool {
        self.exists(id) || self.reserved.contains(&id)
    }

    fn advance(&mut self) {
        loop {
            assert!(self.next_id < ResourceId::MAX, "resource ids exhausted");
            self.next_id += 1;
            if !self.taken(self.next_id) {
                break;
            }
        }
    }

    fn release(&mut self, id: ResourceId) {
        if id < self.next_id {
            self.next_id = id;
        }
    }
}

/// An id set aside for a constructor in flight. Dropping it without
/// [`commit`](Self::commit) hands the id back.
struct Reservation<'a, T: Resource> {
    registry: &'a Registry<T>,
    id: ResourceId,
    committed: bool,
}

impl<T: Resource> Reservation<'_, T> {
    fn commit(mut self, object: T) -> Arc<T> {
        assert_eq!(object.id(), self.id, "constructor stored the wrong id");
        let object = Arc::new(object);
        let mut inner = self.registry.lock();
        inner.reserved.retain(|&r| r != self.id);
        inner.objects.push(Arc::clone(&object));
        trace!(id = self.id, next_id = inner.next_id, "registered object");
        self.committed = true;
        object
    }
}

impl<T: Resource> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut inner = self.registry.lock();
        inner.reserved.retain(|&r| r != self.id);
        inner.release(self.id);
        trace!(id = self.id, next_id = inner.next_id, "returned reserved id");
    }
}

impl<T: Resource> Registry<T> {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    fn starting_at(next_id: ResourceId) -> Self {
        Registry {
            inner: Mutex::new(RegistryInner {
                objects: Vec::new(),
                reserved: Vec::new(),
                next_id,
            }),
        }
    }

    /// Build an object with the next free id and register it.
    pub fn create(&self, ctor: impl FnOnce(ResourceId) -> T) -> ResourceId {
        self.create_shared(ctor).id()
    }

    /// Like [`create`](Self::create), returning the registered handle so the
    /// caller never has to look the new id up again.
    pub fn create_shared(&self, ctor: impl FnOnce(ResourceId) -> T) -> Arc<T> {
        match self.try_create_shared(|id| Ok::<_, Infallible>(ctor(id))) {
            Ok(object) => object,
            Err(never) => match never {},
        }
    }

    /// Like [`create`](Self::create) for constructors that can fail. The id is
    /// not consumed when the constructor fails.
    pub fn try_create<E>(
        &self,
        ctor: impl FnOnce(ResourceId) -> Result<T, E>,
    ) -> Result<ResourceId, E> {
        self.try_create_shared(ctor).map(|object| object.id())
    }

    pub fn try_create_shared<E>(
        &self,
        ctor: impl FnOnce(ResourceId) -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        let reservation = self.reserve();
        let object = ctor(reservation.id)?;
        Ok(reservation.commit(object))
    }

    fn reserve(&self) -> Reservation<'_, T> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.advance();
        inner.reserved.push(id);
        drop(inner);
        Reservation {
            registry: self,
            id,
            committed: false,
        }
    }

    pub fn exists(&self, id: ResourceId) -> bool {
        self.lock().exists(id)
    }

    /// Shared handle to a live object. Panics if `id` is not live.
    pub fn get(&self, id: ResourceId) -> Arc<T> {
        match self.find(id) {
            Some(object) => object,
            None => panic!("no live object with id {id}"),
        }
    }

    pub fn find(&self, id: ResourceId) -> Option<Arc<T>> {
        self.lock().objects.iter().find(|o| o.id() == id).cloned()
    }

    /// Drop the registry's handle to `id`. Panics if `id` is not live.
    ///
    /// The object itself is dropped once the last outstanding handle goes.
    pub fn destroy(&self, id: ResourceId) -> Arc<T> {
        match self.remove(id) {
            Some(object) => object,
            None => panic!("destroying unknown id {id}"),
        }
    }

    /// Check and release in one step, for ids that come from outside.
    pub fn remove(&self, id: ResourceId) -> Option<Arc<T>> {
        self.remove_if(id, |_| true)
    }

    /// Release `id` only if the live object passes `pred`, checked under the
    /// same lock as the removal.
    pub fn remove_if(
        &self,
        id: ResourceId,
        pred: impl FnOnce(&Arc<T>) -> bool,
    ) -> Option<Arc<T>> {
        let mut inner = self.lock();
        let pos = inner.objects.iter().position(|o| o.id() == id)?;
        if !pred(&inner.objects[pos]) {
            return None;
        }
        let object = inner.objects.remove(pos);
        inner.release(id);
        trace!(id, next_id = inner.next_id, "released object");
        Some(object)
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<T>> {
        // Bookkeeping never panics halfway, so a poisoned table is still whole.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Resource> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
