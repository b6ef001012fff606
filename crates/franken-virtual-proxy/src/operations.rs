//! The invariant-enforcing operation set.
//!
//! Each of the thirteen essential internal methods of a virtual object
//! delegates to the backing handler and validates the answer against the
//! shadow record before returning it.  Two failure tiers:
//!
//! - `Ok(false)` (or an absent descriptor) for ordinary refusals,
//! - `Err(ObjectError::InvariantViolation)` when the backing handler
//!   contradicts a fact the shadow has already recorded.
//!
//! The shadow is re-read from the heap after every call into the handler.
//! No borrow of it is held across a delegation, so reentrant calls (getters,
//! setters, handlers touching the same object) always see current state, and
//! every shadow mutation is validated against the state at the moment it is
//! applied.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::descriptor;
use crate::events::{EventOutcome, VirtualProxyEvent, key_set_digest};
use crate::handler::BackingHandler;
use crate::object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey, Reflect,
    resolve_get, set_with_own_descriptor,
};
use crate::shadow::ShadowRecord;
use crate::violation::{InvariantViolation, Operation};
use crate::virtual_object::VirtualObject;

// ---------------------------------------------------------------------------
// Shadow access and evidence
// ---------------------------------------------------------------------------

fn virtual_object(heap: &ObjectHeap, proxy: ObjectHandle) -> Result<&VirtualObject, ObjectError> {
    heap.get(proxy)?
        .as_virtual()
        .ok_or_else(|| ObjectError::TypeError(format!("{proxy} is not a virtual object")))
}

/// The handler and backing object, or `ProxyRevoked`.
fn delegate(
    heap: &ObjectHeap,
    proxy: ObjectHandle,
) -> Result<(Rc<dyn BackingHandler>, ObjectHandle), ObjectError> {
    let object = virtual_object(heap, proxy)?;
    Ok((object.handler()?, object.backing()?))
}

fn shadow(heap: &ObjectHeap, proxy: ObjectHandle) -> Result<&ShadowRecord, ObjectError> {
    Ok(virtual_object(heap, proxy)?.shadow())
}

fn shadow_mut(heap: &mut ObjectHeap, proxy: ObjectHandle) -> Result<&mut ShadowRecord, ObjectError> {
    heap.get_mut(proxy)?
        .as_virtual_mut()
        .map(VirtualObject::shadow_mut)
        .ok_or_else(|| ObjectError::TypeError(format!("{proxy} is not a virtual object")))
}

fn emit(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    operation: Operation,
    outcome: EventOutcome,
    key: Option<&PropertyKey>,
    detail: Option<String>,
) {
    if !heap.config().record_events {
        return;
    }
    let mut event =
        VirtualProxyEvent::new(&heap.config().trace_id, proxy, operation.as_str(), outcome)
            .with_key(key);
    if let Some(detail) = detail {
        event = event.with_detail(detail);
    }
    heap.record(event);
}

fn refuse(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    operation: Operation,
    key: Option<&PropertyKey>,
    reason: &str,
) {
    emit(heap, proxy, operation, EventOutcome::Refused, key, Some(reason.to_string()));
}

/// Build the fatal error for `reason` and record it.
fn violation(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    operation: Operation,
    key: Option<&PropertyKey>,
    reason: &str,
) -> ObjectError {
    let error = ObjectError::from(InvariantViolation::new(operation, key, reason));
    if heap.config().record_events {
        let event = VirtualProxyEvent::new(
            &heap.config().trace_id,
            proxy,
            operation.as_str(),
            EventOutcome::Violation,
        )
        .with_key(key)
        .with_error_code(error.error_code())
        .with_detail(reason);
        heap.record(event);
    }
    error
}

/// Pin `desc` for `key`; a refusal by the shadow is fatal.
fn pin(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    operation: Operation,
    key: &PropertyKey,
    desc: PropertyDescriptor,
) -> Result<(), ObjectError> {
    let shadow = shadow_mut(heap, proxy)?;
    if shadow.get(key) == Some(&desc) {
        return Ok(());
    }
    let known = shadow.contains(key);
    if !shadow.pin(key.clone(), desc) {
        let reason = if known {
            "descriptor incompatible with the pinned non-configurable descriptor"
        } else {
            "new property on a sealed object"
        };
        return Err(violation(heap, proxy, operation, Some(key), reason));
    }
    emit(heap, proxy, operation, EventOutcome::Pinned, Some(key), None);
    Ok(())
}

/// Drop `key` from the shadow to mirror a deletion; purging a
/// non-configurable entry is fatal.
fn purge(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    operation: Operation,
    key: &PropertyKey,
) -> Result<(), ObjectError> {
    let shadow = shadow_mut(heap, proxy)?;
    if !shadow.contains(key) {
        return Ok(());
    }
    if !shadow.remove(key) {
        return Err(violation(
            heap,
            proxy,
            operation,
            Some(key),
            "non-configurable property reported missing",
        ));
    }
    emit(heap, proxy, operation, EventOutcome::Purged, Some(key), None);
    Ok(())
}

// ---------------------------------------------------------------------------
// Extensibility synchronization
// ---------------------------------------------------------------------------

/// The single Open → Sealed transition.
///
/// Pins a permissive placeholder for every backing key the shadow does not
/// know yet, records the backing prototype, then seals.  A no-op when the
/// shadow is already sealed, including when a reentrant call sealed it while
/// the backing handler was being consulted.
pub(crate) fn synchronize(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    origin: Operation,
) -> Result<(), ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    if shadow(heap, proxy)?.is_sealed() {
        return Ok(());
    }

    let keys = handler.own_keys(heap, backing)?;
    if shadow(heap, proxy)?.is_sealed() {
        return Ok(());
    }
    for key in keys {
        let shadow = shadow_mut(heap, proxy)?;
        if shadow.contains(&key) {
            continue;
        }
        if !shadow.pin(key.clone(), descriptor::placeholder()) {
            return Err(violation(
                heap,
                proxy,
                origin,
                Some(&key),
                "shadow refused a placeholder while sealing",
            ));
        }
    }

    let prototype = handler.get_prototype_of(heap, backing)?;
    let shadow = shadow_mut(heap, proxy)?;
    if shadow.is_sealed() {
        return Ok(());
    }
    if !shadow.set_prototype(prototype) {
        return Err(violation(
            heap,
            proxy,
            origin,
            None,
            "shadow refused the prototype while sealing",
        ));
    }
    shadow.seal();
    let digest = key_set_digest(shadow.keys());
    emit(heap, proxy, origin, EventOutcome::Sealed, None, Some(digest));
    Ok(())
}

// ---------------------------------------------------------------------------
// Call / Construct
// ---------------------------------------------------------------------------

pub fn call(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    this: &JsValue,
    args: &[JsValue],
) -> Result<JsValue, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let shape = virtual_object(heap, proxy)?.shape();
    if !shape.is_callable() {
        return Err(ObjectError::TypeError(format!(
            "{proxy} ({shape} carrier) is not a function"
        )));
    }
    handler.call(heap, backing, this, args)
}

pub fn construct(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    args: &[JsValue],
    new_target: &JsValue,
) -> Result<JsValue, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let shape = virtual_object(heap, proxy)?.shape();
    if !shape.is_constructor() {
        return Err(ObjectError::TypeError(format!(
            "{proxy} ({shape} carrier) is not a constructor"
        )));
    }
    if !heap.is_constructor(new_target) {
        return Err(ObjectError::TypeError(
            "new target is not a constructor".to_string(),
        ));
    }
    let result = handler.construct(heap, backing, args, new_target)?;
    if !result.is_object() {
        return Err(ObjectError::TypeError(format!(
            "construct handler returned a non-object ({})",
            result.type_name()
        )));
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

pub fn define_property(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    key: PropertyKey,
    desc: PropertyDescriptor,
) -> Result<bool, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let refusal = {
        let shadow = shadow(heap, proxy)?;
        match shadow.get(&key) {
            None if shadow.is_sealed() => Some("new property on a sealed object"),
            Some(current) if !descriptor::is_compatible_redefinition(current, &desc) => {
                Some("incompatible redefinition of a non-configurable property")
            }
            _ => None,
        }
    };
    if let Some(reason) = refusal {
        refuse(heap, proxy, Operation::DefineProperty, Some(&key), reason);
        return Ok(false);
    }

    // Pinned before delegating: a reentrant redefinition from inside the
    // handler already meets the shadow.
    if !desc.is_configurable() {
        pin(heap, proxy, Operation::DefineProperty, &key, desc.clone())?;
    }
    handler.define_property(heap, backing, key, desc)
}

pub fn get_own_property_descriptor(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    key: &PropertyKey,
) -> Result<Option<PropertyDescriptor>, ObjectError> {
    const OP: Operation = Operation::GetOwnPropertyDescriptor;

    let (handler, backing) = delegate(heap, proxy)?;
    if let Some(frozen) = shadow(heap, proxy)?.frozen(key) {
        return Ok(Some(frozen.clone()));
    }

    let answer = handler.get_own_property_descriptor(heap, backing, key)?;
    let (sealed, known, pinned) = {
        let shadow = shadow(heap, proxy)?;
        (
            shadow.is_sealed(),
            shadow.contains(key),
            shadow.non_configurable(key).is_some(),
        )
    };

    match answer {
        None if pinned => Err(violation(
            heap,
            proxy,
            OP,
            Some(key),
            "non-configurable property reported absent",
        )),
        None => {
            if sealed {
                purge(heap, proxy, OP, key)?;
            }
            Ok(None)
        }
        Some(_) if sealed && !known => {
            refuse(
                heap,
                proxy,
                OP,
                Some(key),
                "property unknown to a sealed object reported as absent",
            );
            Ok(None)
        }
        Some(desc) if pinned && desc.is_configurable() => Err(violation(
            heap,
            proxy,
            OP,
            Some(key),
            "non-configurable property reported configurable",
        )),
        Some(desc) => {
            if !desc.is_configurable() {
                pin(heap, proxy, OP, key, desc.clone())?;
            }
            Ok(Some(desc))
        }
    }
}

pub fn delete_property(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    key: &PropertyKey,
) -> Result<bool, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    if shadow(heap, proxy)?.non_configurable(key).is_some() {
        refuse(
            heap,
            proxy,
            Operation::DeleteProperty,
            Some(key),
            "non-configurable property",
        );
        return Ok(false);
    }

    let deleted = handler.delete_property(heap, backing, key)?;
    if deleted && shadow(heap, proxy)?.is_sealed() {
        purge(heap, proxy, Operation::DeleteProperty, key)?;
    }
    Ok(deleted)
}

pub fn own_keys(heap: &mut ObjectHeap, proxy: ObjectHandle) -> Result<Vec<PropertyKey>, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let answer = handler.own_keys(heap, backing)?;
    if !shadow(heap, proxy)?.is_sealed() {
        return Ok(answer);
    }

    let missing: Vec<PropertyKey> = {
        let reported: BTreeSet<&PropertyKey> = answer.iter().collect();
        shadow(heap, proxy)?
            .keys()
            .filter(|key| !reported.contains(key))
            .cloned()
            .collect()
    };
    for key in &missing {
        purge(heap, proxy, Operation::OwnKeys, key)?;
    }

    let reported = answer.len();
    let keys: Vec<PropertyKey> = {
        let shadow = shadow(heap, proxy)?;
        let mut seen = BTreeSet::new();
        answer
            .into_iter()
            .filter(|key| shadow.contains(key) && seen.insert(key.clone()))
            .collect()
    };
    if keys.len() < reported {
        let reason = format!(
            "dropped {} key(s) outside the sealed key set",
            reported - keys.len()
        );
        refuse(heap, proxy, Operation::OwnKeys, None, &reason);
    }
    Ok(keys)
}

// ---------------------------------------------------------------------------
// Extensibility
// ---------------------------------------------------------------------------

pub fn is_extensible(heap: &mut ObjectHeap, proxy: ObjectHandle) -> Result<bool, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let extensible = handler.is_extensible(heap, backing)?;
    let sealed = shadow(heap, proxy)?.is_sealed();
    match (extensible, sealed) {
        (true, true) => Err(violation(
            heap,
            proxy,
            Operation::IsExtensible,
            None,
            "reported extensible after extensions were prevented",
        )),
        (false, false) => {
            synchronize(heap, proxy, Operation::IsExtensible)?;
            Ok(false)
        }
        _ => Ok(extensible),
    }
}

pub fn prevent_extensions(heap: &mut ObjectHeap, proxy: ObjectHandle) -> Result<bool, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let prevented = handler.prevent_extensions(heap, backing)?;
    let sealed = shadow(heap, proxy)?.is_sealed();
    match (prevented, sealed) {
        (true, _) => {
            synchronize(heap, proxy, Operation::PreventExtensions)?;
            Ok(true)
        }
        (false, false) => {
            refuse(
                heap,
                proxy,
                Operation::PreventExtensions,
                None,
                "backing handler refused to prevent extensions",
            );
            Ok(false)
        }
        (false, true) => Err(violation(
            heap,
            proxy,
            Operation::PreventExtensions,
            None,
            "refused to prevent extensions after extensions were prevented",
        )),
    }
}

// ---------------------------------------------------------------------------
// Prototype
// ---------------------------------------------------------------------------

pub fn get_prototype_of(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
) -> Result<Option<ObjectHandle>, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let shadow = shadow(heap, proxy)?;
    if shadow.is_sealed() {
        return Ok(shadow.prototype());
    }
    handler.get_prototype_of(heap, backing)
}

pub fn set_prototype_of(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    proto: Option<ObjectHandle>,
) -> Result<bool, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    let shadow = shadow(heap, proxy)?;
    if shadow.is_sealed() {
        let unchanged = shadow.prototype() == proto;
        if !unchanged {
            refuse(
                heap,
                proxy,
                Operation::SetPrototypeOf,
                None,
                "prototype is frozen",
            );
        }
        return Ok(unchanged);
    }
    handler.set_prototype_of(heap, backing, proto)
}

// ---------------------------------------------------------------------------
// has / get / set
// ---------------------------------------------------------------------------

pub fn has(heap: &mut ObjectHeap, proxy: ObjectHandle, key: &PropertyKey) -> Result<bool, ObjectError> {
    let (handler, backing) = delegate(heap, proxy)?;
    if shadow(heap, proxy)?.non_configurable(key).is_some() {
        return Ok(true);
    }

    let present = handler.has(heap, backing, key)?;
    let (sealed, known, prototype) = {
        let shadow = shadow(heap, proxy)?;
        (shadow.is_sealed(), shadow.contains(key), shadow.prototype())
    };
    if !sealed {
        return Ok(present);
    }
    if !present {
        purge(heap, proxy, Operation::Has, key)?;
        return Ok(false);
    }
    if known {
        return Ok(true);
    }
    // Unknown own key on a sealed object: only the frozen prototype chain
    // can still supply it.
    let inherited = match prototype {
        Some(parent) => Reflect::has(heap, parent, key)?,
        None => false,
    };
    if !inherited {
        refuse(
            heap,
            proxy,
            Operation::Has,
            Some(key),
            "property unknown to a sealed object reported present",
        );
    }
    Ok(inherited)
}

/// Derived from the validated own descriptor and the effective prototype.
pub fn get(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    key: &PropertyKey,
    receiver: &JsValue,
) -> Result<JsValue, ObjectError> {
    // Frozen descriptors come straight from the shadow.
    match get_own_property_descriptor(heap, proxy, key)? {
        Some(desc) => resolve_get(heap, &desc, receiver),
        None => match get_prototype_of(heap, proxy)? {
            Some(parent) => Reflect::get(heap, parent, key, receiver),
            None => Ok(JsValue::Undefined),
        },
    }
}

/// Derived like [`get`].  A writable data property is written onto
/// `receiver`, through the receiver's own `defineProperty`.
pub fn set(
    heap: &mut ObjectHeap,
    proxy: ObjectHandle,
    key: &PropertyKey,
    value: JsValue,
    receiver: &JsValue,
) -> Result<bool, ObjectError> {
    let desc = match get_own_property_descriptor(heap, proxy, key)? {
        Some(desc) => desc,
        None => match get_prototype_of(heap, proxy)? {
            Some(parent) => return Reflect::set(heap, parent, key, value, receiver),
            None => PropertyDescriptor::data(JsValue::Undefined),
        },
    };
    set_with_own_descriptor(heap, key, value, receiver, desc)
}
