//! Virtual objects and their construction entry points.
//!
//! A virtual object is a heap slot holding a carrier shape, a shadow record,
//! the backing object and the backing handler.  Revocation drops the
//! backing pair; every operation afterwards fails with
//! [`ObjectError::ProxyRevoked`].

use std::fmt;
use std::rc::Rc;

use crate::carrier::CarrierShape;
use crate::handler::BackingHandler;
use crate::object_model::{ManagedObject, ObjectError, ObjectHandle, ObjectHeap};
use crate::shadow::ShadowRecord;

/// Invariant-enforcing wrapper over a backing object and its handler.
pub struct VirtualObject {
    shape: CarrierShape,
    shadow: ShadowRecord,
    backing: Option<ObjectHandle>,
    handler: Option<Rc<dyn BackingHandler>>,
}

impl VirtualObject {
    fn new(shape: CarrierShape, backing: ObjectHandle, handler: Rc<dyn BackingHandler>) -> Self {
        Self {
            shape,
            shadow: ShadowRecord::new(),
            backing: Some(backing),
            handler: Some(handler),
        }
    }

    /// Carrier shape chosen at construction.
    pub fn shape(&self) -> CarrierShape {
        self.shape
    }

    /// Read-only view of the pinned state.
    pub fn shadow(&self) -> &ShadowRecord {
        &self.shadow
    }

    pub(crate) fn shadow_mut(&mut self) -> &mut ShadowRecord {
        &mut self.shadow
    }

    /// Whether the proxy has been revoked.
    pub fn is_revoked(&self) -> bool {
        self.backing.is_none()
    }

    /// The backing object, or `ProxyRevoked` after revocation.
    pub fn backing(&self) -> Result<ObjectHandle, ObjectError> {
        self.backing.ok_or(ObjectError::ProxyRevoked)
    }

    pub(crate) fn handler(&self) -> Result<Rc<dyn BackingHandler>, ObjectError> {
        self.handler.clone().ok_or(ObjectError::ProxyRevoked)
    }

    pub(crate) fn revoke(&mut self) {
        self.backing = None;
        self.handler = None;
    }
}

impl fmt::Debug for VirtualObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualObject")
            .field("shape", &self.shape)
            .field("class", &self.shape.class_tag())
            .field("shadow", &self.shadow)
            .field("backing", &self.backing)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}

/// Constructors for virtual objects.
pub struct VirtualProxy;

impl VirtualProxy {
    /// Wrap `backing` behind `handler`, presenting it as `shape`.
    ///
    /// Fails with `TypeError` when `shape` promises a capability (call or
    /// construct) the backing object does not have.
    pub fn new(
        heap: &mut ObjectHeap,
        shape: CarrierShape,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<ObjectHandle, ObjectError> {
        heap.get(backing)?;
        let backing_value = backing.into();
        if shape.is_callable() && !heap.is_callable(&backing_value) {
            return Err(ObjectError::TypeError(format!(
                "{shape} carrier requires a callable backing object, got {backing}"
            )));
        }
        if shape.is_constructor() && !heap.is_constructor(&backing_value) {
            return Err(ObjectError::TypeError(format!(
                "{shape} carrier requires a constructable backing object, got {backing}"
            )));
        }
        Ok(heap.alloc_virtual(VirtualObject::new(shape, backing, handler)))
    }

    /// Wrap `backing` as a plain-object carrier.
    pub fn object(
        heap: &mut ObjectHeap,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<ObjectHandle, ObjectError> {
        Self::new(heap, CarrierShape::Record, backing, handler)
    }

    /// Wrap `backing` as an array carrier.
    pub fn array(
        heap: &mut ObjectHeap,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<ObjectHandle, ObjectError> {
        Self::new(heap, CarrierShape::List, backing, handler)
    }

    /// Wrap `backing` as a constructable function carrier.
    pub fn function(
        heap: &mut ObjectHeap,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<ObjectHandle, ObjectError> {
        Self::new(heap, CarrierShape::Function, backing, handler)
    }

    /// Wrap `backing` as a callable, non-constructable carrier.
    pub fn arrow(
        heap: &mut ObjectHeap,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<ObjectHandle, ObjectError> {
        Self::new(heap, CarrierShape::Arrow, backing, handler)
    }

    /// Wrap `backing` with the carrier shape selected from it.
    pub fn wrap(
        heap: &mut ObjectHeap,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<ObjectHandle, ObjectError> {
        let shape = CarrierShape::select(heap, backing)?;
        Self::new(heap, shape, backing, handler)
    }

    /// Like [`VirtualProxy::wrap`], also returning the capability that
    /// revokes the new object.
    pub fn revocable(
        heap: &mut ObjectHeap,
        backing: ObjectHandle,
        handler: Rc<dyn BackingHandler>,
    ) -> Result<(ObjectHandle, Revoker), ObjectError> {
        let proxy = Self::wrap(heap, backing, handler)?;
        Ok((proxy, Revoker { proxy }))
    }

    /// Read-only view of a virtual object's shadow record.
    pub fn shadow(heap: &ObjectHeap, proxy: ObjectHandle) -> Result<&ShadowRecord, ObjectError> {
        match heap.get(proxy)? {
            ManagedObject::Virtual(v) => Ok(v.shadow()),
            ManagedObject::Ordinary(_) => Err(ObjectError::TypeError(format!(
                "{proxy} is not a virtual object"
            ))),
        }
    }

    /// Whether `handle` names a virtual object.
    pub fn is_virtual(heap: &ObjectHeap, handle: ObjectHandle) -> bool {
        matches!(heap.get(handle), Ok(ManagedObject::Virtual(_)))
    }
}

/// Capability revoking one virtual object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revoker {
    proxy: ObjectHandle,
}

impl Revoker {
    /// The virtual object this capability revokes.
    pub fn proxy(&self) -> ObjectHandle {
        self.proxy
    }

    /// Revoke the virtual object.  Repeated calls are no-ops.
    pub fn revoke(&self, heap: &mut ObjectHeap) -> Result<(), ObjectError> {
        heap.revoke_proxy(self.proxy)
    }
}
