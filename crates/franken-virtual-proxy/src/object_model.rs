//! Host object model with property descriptors, prototype chains, native
//! functions, and virtual objects.
//!
//! This is the environment virtual objects live in.  Key features:
//!
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Ordinary objects**: `[[DefineOwnProperty]]` validate-and-apply, `[[Delete]]`,
//!   `[[OwnPropertyKeys]]` ordering, `[[PreventExtensions]]`
//! - **Native functions**: Rust closures registered as callable heap objects
//! - **Virtual objects**: heap slots whose essential internal methods are
//!   routed through [`crate::operations`]
//! - **Reflect**: the 13 essential internal methods as ordinary functions,
//!   dispatching on the managed object kind
//!
//! `BTreeMap`/`BTreeSet` for deterministic ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::VirtualProxyConfig;
use crate::descriptor;
use crate::events::{EventOutcome, VirtualProxyEvent};
use crate::operations;
use crate::violation::InvariantViolation;
use crate::virtual_object::VirtualObject;

/// Serialize/deserialize `BTreeMap<PropertyKey, PropertyDescriptor>` as a
/// sorted sequence of `[key, descriptor]` pairs.  serde_json requires string
/// keys for JSON maps but `PropertyKey` is an enum.
pub(crate) mod properties_as_seq {
    use super::{BTreeMap, PropertyDescriptor, PropertyKey};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PropertyKey, PropertyDescriptor>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&PropertyKey, &PropertyDescriptor)> = map.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PropertyKey, PropertyDescriptor>, D::Error> {
        let pairs: Vec<(PropertyKey, PropertyDescriptor)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// PropertyKey: string or symbol
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<SymbolId> for PropertyKey {
    fn from(id: SymbolId) -> Self {
        Self::Symbol(id)
    }
}

// ---------------------------------------------------------------------------
// ObjectHandle: typed reference to heap objects
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// JsValue: runtime value for the object model
// ---------------------------------------------------------------------------

/// Runtime value.  Functions are objects: callability is a property of the
/// heap slot, not of the value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
}

impl JsValue {
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Self::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(_) => "object",
        }
    }

    /// SameValue comparison.
    pub fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
        }
    }
}

impl From<ObjectHandle> for JsValue {
    fn from(handle: ObjectHandle) -> Self {
        Self::Object(handle)
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Complete property descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: getter/setter function objects, compared by identity.
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Create an enumerable, configurable accessor descriptor.
    pub fn accessor(get: Option<ObjectHandle>, set: Option<ObjectHandle>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    /// Is this descriptor configurable?
    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    /// Is this descriptor enumerable?
    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&JsValue> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Errors from object model operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ObjectError {
    /// Host-level TypeError (shape mismatch, non-callable, ...).
    #[error("TypeError: {0}")]
    TypeError(String),
    /// Object not found in the heap.
    #[error("{0} not found")]
    ObjectNotFound(ObjectHandle),
    /// Virtual object has been revoked.
    #[error("TypeError: proxy has been revoked")]
    ProxyRevoked,
    /// Prototype chain cycle detected.
    #[error("TypeError: prototype chain cycle detected")]
    PrototypeCycleDetected,
    /// Maximum dispatch depth exceeded.
    #[error("TypeError: prototype chain depth {depth} exceeds max {max}")]
    PrototypeChainTooDeep { depth: u32, max: u32 },
    /// A native function threw a value.
    #[error("uncaught exception: {0}")]
    Thrown(JsValue),
    /// The backing handler contradicted a recorded invariant.
    #[error("TypeError: {0}")]
    InvariantViolation(InvariantViolation),
}

impl ObjectError {
    /// Stable error code for structured events.
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::TypeError(_) => "FE-VPROXY-0001",
            Self::ObjectNotFound(_) => "FE-VPROXY-0002",
            Self::ProxyRevoked => "FE-VPROXY-0003",
            Self::PrototypeCycleDetected => "FE-VPROXY-0004",
            Self::PrototypeChainTooDeep { .. } => "FE-VPROXY-0005",
            Self::Thrown(_) => "FE-VPROXY-0006",
            Self::InvariantViolation(_) => "FE-VPROXY-0007",
        }
    }

    /// Is this a fatal backing inconsistency?
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl From<InvariantViolation> for ObjectError {
    fn from(violation: InvariantViolation) -> Self {
        Self::InvariantViolation(violation)
    }
}

// ---------------------------------------------------------------------------
// OrdinaryObject: the core host object
// ---------------------------------------------------------------------------

/// An ordinary object with internal slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdinaryObject {
    /// `[[Prototype]]` internal slot (null means end of chain).
    pub prototype: Option<ObjectHandle>,
    /// `[[Extensible]]` internal slot.
    pub extensible: bool,
    /// Own properties with descriptors, keyed by PropertyKey.
    #[serde(with = "properties_as_seq")]
    pub properties: BTreeMap<PropertyKey, PropertyDescriptor>,
    /// `[[Class]]` tag for intrinsic identification (`"Array"`, `"Function"`).
    pub class_tag: Option<String>,
    /// Is this object callable (i.e. a function)?
    pub callable: bool,
    /// Is this object a constructor?
    pub constructable: bool,
}

impl Default for OrdinaryObject {
    fn default() -> Self {
        Self {
            prototype: None,
            extensible: true,
            properties: BTreeMap::new(),
            class_tag: None,
            callable: false,
            constructable: false,
        }
    }
}

impl OrdinaryObject {
    /// Create a new ordinary object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectHandle>) -> Self {
        Self {
            prototype: proto,
            ..Self::default()
        }
    }

    // -- [[GetOwnProperty]] -------------------------------------------------

    /// `[[GetOwnProperty]](P)`: return the own property descriptor for `key`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    /// Does this object have an own property `key`?
    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    // -- [[DefineOwnProperty]] ----------------------------------------------

    /// `[[DefineOwnProperty]](P, Desc)`: define or update a property.
    ///
    /// Returns `false` when the object is non-extensible and `key` is new, or
    /// when `key` is non-configurable and `desc` is not a compatible
    /// redefinition.
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        match self.properties.get(&key) {
            Some(current) if !descriptor::is_compatible_redefinition(current, &desc) => false,
            Some(_) => {
                self.properties.insert(key, desc);
                true
            }
            None if !self.extensible => false,
            None => {
                self.properties.insert(key, desc);
                true
            }
        }
    }

    // -- [[Delete]] ---------------------------------------------------------

    /// `[[Delete]](P)`: delete a property. Returns `false` if non-configurable.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            Some(desc) if !desc.is_configurable() => false,
            Some(_) => {
                self.properties.remove(key);
                true
            }
            // Absent: vacuously true.
            None => true,
        }
    }

    // -- [[OwnPropertyKeys]] ------------------------------------------------

    /// `[[OwnPropertyKeys]]()`: integer indices (sorted numerically), then
    /// string keys (BTreeMap order), then symbol keys.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in self.properties.keys() {
            match key {
                PropertyKey::String(s) => {
                    if let Ok(n) = s.parse::<u64>() {
                        int_keys.push((n, key.clone()));
                    } else {
                        str_keys.push(key.clone());
                    }
                }
                PropertyKey::Symbol(_) => {
                    sym_keys.push(key.clone());
                }
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        result
    }

    // -- [[PreventExtensions]] ----------------------------------------------

    /// `[[PreventExtensions]]()`: makes this object non-extensible.
    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }
}

// ---------------------------------------------------------------------------
// Native functions
// ---------------------------------------------------------------------------

/// `[[Call]]` behaviour of a native function: `(heap, this, args)`.
pub type NativeFn = Rc<dyn Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError>>;

/// `[[Construct]]` behaviour of a native constructor: `(heap, args, new_target)`.
pub type NativeConstructFn =
    Rc<dyn Fn(&mut ObjectHeap, &[JsValue], &JsValue) -> Result<JsValue, ObjectError>>;

#[derive(Clone)]
struct FunctionBehavior {
    call: NativeFn,
    construct: Option<NativeConstructFn>,
}

impl fmt::Debug for FunctionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionBehavior")
            .field("constructable", &self.construct.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ManagedObject: union of ordinary and virtual
// ---------------------------------------------------------------------------

/// A managed object: either ordinary or virtual.
#[derive(Debug)]
pub enum ManagedObject {
    Ordinary(OrdinaryObject),
    Virtual(VirtualObject),
}

impl ManagedObject {
    /// Get the ordinary object, if this is one.
    pub fn as_ordinary(&self) -> Option<&OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Virtual(_) => None,
        }
    }

    /// Get a mutable ordinary object, if this is one.
    pub fn as_ordinary_mut(&mut self) -> Option<&mut OrdinaryObject> {
        match self {
            Self::Ordinary(o) => Some(o),
            Self::Virtual(_) => None,
        }
    }

    /// Get the virtual object, if this is one.
    pub fn as_virtual(&self) -> Option<&VirtualObject> {
        match self {
            Self::Virtual(v) => Some(v),
            Self::Ordinary(_) => None,
        }
    }

    /// Get a mutable virtual object, if this is one.
    pub fn as_virtual_mut(&mut self) -> Option<&mut VirtualObject> {
        match self {
            Self::Virtual(v) => Some(v),
            Self::Ordinary(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Ordinary,
    Virtual,
}

// ---------------------------------------------------------------------------
// ObjectHeap: the managed object store
// ---------------------------------------------------------------------------

/// The object heap: arena of managed objects plus native function table,
/// configuration and the structured event log.
#[derive(Debug, Default)]
pub struct ObjectHeap {
    objects: Vec<ManagedObject>,
    functions: BTreeMap<ObjectHandle, FunctionBehavior>,
    next_symbol: u32,
    config: VirtualProxyConfig,
    events: Vec<VirtualProxyEvent>,
    depth: u32,
}

impl ObjectHeap {
    /// Create a new empty heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(VirtualProxyConfig::default())
    }

    /// Create a new empty heap with `config`.
    pub fn with_config(config: VirtualProxyConfig) -> Self {
        Self {
            objects: Vec::new(),
            functions: BTreeMap::new(),
            next_symbol: 1,
            config,
            events: Vec::new(),
            depth: 0,
        }
    }

    pub fn config(&self) -> &VirtualProxyConfig {
        &self.config
    }

    fn push(&mut self, object: ManagedObject) -> ObjectHandle {
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(object);
        handle
    }

    /// Allocate a new ordinary object with the given prototype.
    pub fn alloc(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.push(ManagedObject::Ordinary(OrdinaryObject::with_prototype(
            proto,
        )))
    }

    /// Allocate a new ordinary object with no prototype.
    pub fn alloc_plain(&mut self) -> ObjectHandle {
        self.alloc(None)
    }

    /// Allocate an array-tagged ordinary object.
    pub fn alloc_array(&mut self, proto: Option<ObjectHandle>) -> ObjectHandle {
        self.push(ManagedObject::Ordinary(OrdinaryObject {
            class_tag: Some("Array".to_string()),
            ..OrdinaryObject::with_prototype(proto)
        }))
    }

    /// Allocate a callable, non-constructable native function.
    pub fn alloc_function(
        &mut self,
        call: impl Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError> + 'static,
    ) -> ObjectHandle {
        self.alloc_native(Rc::new(call), None)
    }

    /// Allocate a native function that is both callable and constructable.
    pub fn alloc_constructor(
        &mut self,
        call: impl Fn(&mut ObjectHeap, &JsValue, &[JsValue]) -> Result<JsValue, ObjectError> + 'static,
        construct: impl Fn(&mut ObjectHeap, &[JsValue], &JsValue) -> Result<JsValue, ObjectError>
        + 'static,
    ) -> ObjectHandle {
        self.alloc_native(Rc::new(call), Some(Rc::new(construct)))
    }

    fn alloc_native(&mut self, call: NativeFn, construct: Option<NativeConstructFn>) -> ObjectHandle {
        let handle = self.push(ManagedObject::Ordinary(OrdinaryObject {
            class_tag: Some("Function".to_string()),
            callable: true,
            constructable: construct.is_some(),
            ..OrdinaryObject::default()
        }));
        self.functions
            .insert(handle, FunctionBehavior { call, construct });
        handle
    }

    /// Allocate a virtual object slot.
    pub(crate) fn alloc_virtual(&mut self, object: VirtualObject) -> ObjectHandle {
        self.push(ManagedObject::Virtual(object))
    }

    /// Allocate a new unique symbol id.
    pub fn alloc_symbol(&mut self) -> SymbolId {
        let id = SymbolId(self.next_symbol);
        self.next_symbol += 1;
        id
    }

    /// Get a reference to a managed object.
    pub fn get(&self, handle: ObjectHandle) -> Result<&ManagedObject, ObjectError> {
        self.objects
            .get(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Get a mutable reference to a managed object.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut ManagedObject, ObjectError> {
        self.objects
            .get_mut(handle.0 as usize)
            .ok_or(ObjectError::ObjectNotFound(handle))
    }

    /// Get an ordinary object, or `TypeError` if the slot is virtual.
    pub fn ordinary(&self, handle: ObjectHandle) -> Result<&OrdinaryObject, ObjectError> {
        self.get(handle)?
            .as_ordinary()
            .ok_or_else(|| ObjectError::TypeError(format!("{handle} is not an ordinary object")))
    }

    /// Get a mutable ordinary object, or `TypeError` if the slot is virtual.
    pub fn ordinary_mut(&mut self, handle: ObjectHandle) -> Result<&mut OrdinaryObject, ObjectError> {
        self.get_mut(handle)?
            .as_ordinary_mut()
            .ok_or_else(|| ObjectError::TypeError(format!("{handle} is not an ordinary object")))
    }

    fn kind(&self, handle: ObjectHandle) -> Result<ObjectKind, ObjectError> {
        Ok(match self.get(handle)? {
            ManagedObject::Ordinary(_) => ObjectKind::Ordinary,
            ManagedObject::Virtual(_) => ObjectKind::Virtual,
        })
    }

    /// Number of objects allocated.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Is the heap empty?
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// `IsCallable(value)`.
    pub fn is_callable(&self, value: &JsValue) -> bool {
        match value.as_object().and_then(|h| self.get(h).ok()) {
            Some(ManagedObject::Ordinary(o)) => o.callable,
            Some(ManagedObject::Virtual(v)) => v.shape().is_callable(),
            None => false,
        }
    }

    /// `IsConstructor(value)`.
    pub fn is_constructor(&self, value: &JsValue) -> bool {
        match value.as_object().and_then(|h| self.get(h).ok()) {
            Some(ManagedObject::Ordinary(o)) => o.constructable,
            Some(ManagedObject::Virtual(v)) => v.shape().is_constructor(),
            None => false,
        }
    }

    /// Revoke a virtual object.  Revoking twice is a no-op.
    pub fn revoke_proxy(&mut self, handle: ObjectHandle) -> Result<(), ObjectError> {
        let object = self.get_mut(handle)?;
        match object {
            ManagedObject::Virtual(v) => {
                if v.is_revoked() {
                    return Ok(());
                }
                v.revoke();
            }
            ManagedObject::Ordinary(_) => {
                return Err(ObjectError::TypeError(
                    "cannot revoke non-virtual object".to_string(),
                ));
            }
        }
        let event =
            VirtualProxyEvent::new(&self.config.trace_id, handle, "revoke", EventOutcome::Revoked);
        self.record(event);
        Ok(())
    }

    // -- Event log ----------------------------------------------------------

    /// Append a structured event (dropped when recording is disabled).
    ///
    /// The log holds at most `max_events` entries; a full log drops its
    /// oldest entry.  Callers that need every event drain the log.
    pub(crate) fn record(&mut self, event: VirtualProxyEvent) {
        let capacity = self.config.max_events;
        if !self.config.record_events || capacity == 0 {
            return;
        }
        if self.events.len() >= capacity {
            let excess = self.events.len() + 1 - capacity;
            self.events.drain(..excess);
        }
        self.events.push(event);
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> &[VirtualProxyEvent] {
        &self.events
    }

    /// Take all recorded events.
    pub fn drain_events(&mut self) -> Vec<VirtualProxyEvent> {
        std::mem::take(&mut self.events)
    }

    // -- Dispatch depth guard -----------------------------------------------

    /// Run `f` one dispatch level deeper, failing once the configured
    /// maximum depth is exceeded.
    fn descend<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ObjectError>,
    ) -> Result<T, ObjectError> {
        let max = self.config.max_dispatch_depth;
        if self.depth >= max {
            return Err(ObjectError::PrototypeChainTooDeep {
                depth: self.depth + 1,
                max,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

// ---------------------------------------------------------------------------
// Ordinary internal methods that need heap access
// ---------------------------------------------------------------------------

/// Resolve a descriptor to the value a `[[Get]]` with `receiver` observes.
pub(crate) fn resolve_get(
    heap: &mut ObjectHeap,
    desc: &PropertyDescriptor,
    receiver: &JsValue,
) -> Result<JsValue, ObjectError> {
    match desc {
        PropertyDescriptor::Data { value, .. } => Ok(value.clone()),
        PropertyDescriptor::Accessor { get: Some(getter), .. } => {
            Reflect::apply(heap, &JsValue::Object(*getter), receiver, &[])
        }
        PropertyDescriptor::Accessor { get: None, .. } => Ok(JsValue::Undefined),
    }
}

/// OrdinarySetWithOwnDescriptor: apply a write of `value` given the
/// descriptor `desc` found for `key`.  Writable data properties are written
/// onto `receiver`, never onto the object where `desc` was found.
pub(crate) fn set_with_own_descriptor(
    heap: &mut ObjectHeap,
    key: &PropertyKey,
    value: JsValue,
    receiver: &JsValue,
    desc: PropertyDescriptor,
) -> Result<bool, ObjectError> {
    match desc {
        PropertyDescriptor::Data {
            writable: false, ..
        } => Ok(false),
        PropertyDescriptor::Data { .. } => {
            let Some(receiver) = receiver.as_object() else {
                return Ok(false);
            };
            match Reflect::get_own_property_descriptor(heap, receiver, key)? {
                Some(PropertyDescriptor::Data {
                    writable: true,
                    enumerable,
                    configurable,
                    ..
                }) => Reflect::define_property(
                    heap,
                    receiver,
                    key.clone(),
                    PropertyDescriptor::Data {
                        value,
                        writable: true,
                        enumerable,
                        configurable,
                    },
                ),
                Some(_) => Ok(false),
                None => Reflect::define_property(
                    heap,
                    receiver,
                    key.clone(),
                    PropertyDescriptor::data(value),
                ),
            }
        }
        PropertyDescriptor::Accessor {
            set: Some(setter), ..
        } => {
            Reflect::apply(heap, &JsValue::Object(setter), receiver, &[value])?;
            Ok(true)
        }
        PropertyDescriptor::Accessor { set: None, .. } => Ok(false),
    }
}

fn ordinary_get(
    heap: &mut ObjectHeap,
    target: ObjectHandle,
    key: &PropertyKey,
    receiver: &JsValue,
) -> Result<JsValue, ObjectError> {
    let (own, proto) = {
        let o = heap.ordinary(target)?;
        (o.get_own_property(key).cloned(), o.prototype)
    };
    match (own, proto) {
        (Some(desc), _) => resolve_get(heap, &desc, receiver),
        (None, Some(parent)) => Reflect::get(heap, parent, key, receiver),
        (None, None) => Ok(JsValue::Undefined),
    }
}

fn ordinary_set(
    heap: &mut ObjectHeap,
    target: ObjectHandle,
    key: &PropertyKey,
    value: JsValue,
    receiver: &JsValue,
) -> Result<bool, ObjectError> {
    let (own, proto) = {
        let o = heap.ordinary(target)?;
        (o.get_own_property(key).cloned(), o.prototype)
    };
    let desc = match (own, proto) {
        (Some(desc), _) => desc,
        (None, Some(parent)) => return Reflect::set(heap, parent, key, value, receiver),
        (None, None) => PropertyDescriptor::data(JsValue::Undefined),
    };
    set_with_own_descriptor(heap, key, value, receiver, desc)
}

fn ordinary_has(
    heap: &mut ObjectHeap,
    target: ObjectHandle,
    key: &PropertyKey,
) -> Result<bool, ObjectError> {
    let (own, proto) = {
        let o = heap.ordinary(target)?;
        (o.has_own_property(key), o.prototype)
    };
    if own {
        return Ok(true);
    }
    match proto {
        Some(parent) => Reflect::has(heap, parent, key),
        None => Ok(false),
    }
}

fn ordinary_set_prototype_of(
    heap: &mut ObjectHeap,
    target: ObjectHandle,
    proto: Option<ObjectHandle>,
) -> Result<bool, ObjectError> {
    {
        let o = heap.ordinary(target)?;
        if !o.extensible {
            // Non-extensible: can only set prototype to current value.
            return Ok(o.prototype == proto);
        }
    }

    // Reject cycles through ordinary objects; a virtual link ends the walk.
    let mut current = proto;
    let mut visited = BTreeSet::new();
    visited.insert(target);
    while let Some(h) = current {
        if !visited.insert(h) {
            return Ok(false);
        }
        current = match heap.get(h)? {
            ManagedObject::Ordinary(o) => o.prototype,
            ManagedObject::Virtual(_) => None,
        };
    }

    heap.ordinary_mut(target)?.prototype = proto;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Reflect: the essential internal methods
// ---------------------------------------------------------------------------

/// Static methods mirroring the 13 essential internal methods.
///
/// Ordinary objects get ordinary semantics; virtual objects are routed
/// through the invariant-enforcing operation set.
pub struct Reflect;

impl Reflect {
    /// `Reflect.apply(f, this, args)`.
    pub fn apply(
        heap: &mut ObjectHeap,
        function: &JsValue,
        this: &JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        let Some(target) = function.as_object() else {
            return Err(ObjectError::TypeError(format!(
                "{} is not a function",
                function.type_name()
            )));
        };
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => {
                let behavior = heap.functions.get(&target).map(|b| Rc::clone(&b.call));
                match behavior {
                    Some(call) => call(heap, this, args),
                    None => Err(ObjectError::TypeError(format!("{target} is not a function"))),
                }
            }
            ObjectKind::Virtual => operations::call(heap, target, this, args),
        })
    }

    /// `Reflect.construct(f, args, newTarget)`.
    pub fn construct(
        heap: &mut ObjectHeap,
        function: &JsValue,
        args: &[JsValue],
        new_target: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        let Some(target) = function.as_object() else {
            return Err(ObjectError::TypeError(format!(
                "{} is not a constructor",
                function.type_name()
            )));
        };
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => {
                if !heap.is_constructor(new_target) {
                    return Err(ObjectError::TypeError(
                        "new target is not a constructor".to_string(),
                    ));
                }
                let behavior = heap
                    .functions
                    .get(&target)
                    .and_then(|b| b.construct.as_ref().map(Rc::clone));
                match behavior {
                    Some(construct) => construct(heap, args, new_target),
                    None => Err(ObjectError::TypeError(format!(
                        "{target} is not a constructor"
                    ))),
                }
            }
            ObjectKind::Virtual => operations::construct(heap, target, args, new_target),
        })
    }

    /// `Reflect.defineProperty(target, key, desc)`.
    pub fn define_property(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => Ok(heap.ordinary_mut(target)?.define_own_property(key, desc)),
            ObjectKind::Virtual => operations::define_property(heap, target, key, desc),
        })
    }

    /// `Reflect.getOwnPropertyDescriptor(target, key)`.
    pub fn get_own_property_descriptor(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => Ok(heap.ordinary(target)?.get_own_property(key).cloned()),
            ObjectKind::Virtual => operations::get_own_property_descriptor(heap, target, key),
        })
    }

    /// `Reflect.deleteProperty(target, key)`.
    pub fn delete_property(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => Ok(heap.ordinary_mut(target)?.delete(key)),
            ObjectKind::Virtual => operations::delete_property(heap, target, key),
        })
    }

    /// `Reflect.ownKeys(target)`.
    pub fn own_keys(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Vec<PropertyKey>, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => Ok(heap.ordinary(target)?.own_property_keys()),
            ObjectKind::Virtual => operations::own_keys(heap, target),
        })
    }

    /// `Reflect.isExtensible(target)`.
    pub fn is_extensible(heap: &mut ObjectHeap, target: ObjectHandle) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => Ok(heap.ordinary(target)?.extensible),
            ObjectKind::Virtual => operations::is_extensible(heap, target),
        })
    }

    /// `Reflect.preventExtensions(target)`.
    pub fn prevent_extensions(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => {
                heap.ordinary_mut(target)?.prevent_extensions();
                Ok(true)
            }
            ObjectKind::Virtual => operations::prevent_extensions(heap, target),
        })
    }

    /// `Reflect.getPrototypeOf(target)`.
    pub fn get_prototype_of(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => Ok(heap.ordinary(target)?.prototype),
            ObjectKind::Virtual => operations::get_prototype_of(heap, target),
        })
    }

    /// `Reflect.setPrototypeOf(target, proto)`.
    pub fn set_prototype_of(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => ordinary_set_prototype_of(heap, target, proto),
            ObjectKind::Virtual => operations::set_prototype_of(heap, target, proto),
        })
    }

    /// `Reflect.has(target, key)`.
    pub fn has(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => ordinary_has(heap, target, key),
            ObjectKind::Virtual => operations::has(heap, target, key),
        })
    }

    /// `Reflect.get(target, key, receiver)`.
    pub fn get(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        receiver: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => ordinary_get(heap, target, key, receiver),
            ObjectKind::Virtual => operations::get(heap, target, key, receiver),
        })
    }

    /// `Reflect.set(target, key, value, receiver)`.
    pub fn set(
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        value: JsValue,
        receiver: &JsValue,
    ) -> Result<bool, ObjectError> {
        heap.descend(|heap| match heap.kind(target)? {
            ObjectKind::Ordinary => ordinary_set(heap, target, key, value, receiver),
            ObjectKind::Virtual => operations::set(heap, target, key, value, receiver),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
