//! The backing handler contract.
//!
//! A backing handler supplies the real behaviour of a virtual object.  It is
//! untrusted: every answer is validated against the shadow record before it
//! reaches the consumer.  Each method receives the backing object in place
//! of the virtual object; a method left unimplemented applies the host's
//! native behaviour ([`Reflect`]) to the backing object.

use crate::object_model::{
    JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor, PropertyKey, Reflect,
};

pub trait BackingHandler {
    fn call(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        this: &JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, ObjectError> {
        Reflect::apply(heap, &JsValue::Object(target), this, args)
    }

    fn construct(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        args: &[JsValue],
        new_target: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        Reflect::construct(heap, &JsValue::Object(target), args, new_target)
    }

    fn define_property(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        Reflect::define_property(heap, target, key, desc)
    }

    fn get_own_property_descriptor(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Reflect::get_own_property_descriptor(heap, target, key)
    }

    fn delete_property(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Reflect::delete_property(heap, target, key)
    }

    fn own_keys(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Vec<PropertyKey>, ObjectError> {
        Reflect::own_keys(heap, target)
    }

    fn is_extensible(&self, heap: &mut ObjectHeap, target: ObjectHandle) -> Result<bool, ObjectError> {
        Reflect::is_extensible(heap, target)
    }

    fn prevent_extensions(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<bool, ObjectError> {
        Reflect::prevent_extensions(heap, target)
    }

    fn get_prototype_of(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        Reflect::get_prototype_of(heap, target)
    }

    fn set_prototype_of(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        proto: Option<ObjectHandle>,
    ) -> Result<bool, ObjectError> {
        Reflect::set_prototype_of(heap, target, proto)
    }

    fn has(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        Reflect::has(heap, target, key)
    }

    /// Part of the contract for handlers used as a general reflection
    /// surface.  The virtual object's own `get` is derived from
    /// `get_own_property_descriptor` and `get_prototype_of`.
    fn get(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        receiver: &JsValue,
    ) -> Result<JsValue, ObjectError> {
        Reflect::get(heap, target, key, receiver)
    }

    /// See [`BackingHandler::get`]; the virtual object's `set` is derived the
    /// same way.
    fn set(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
        value: JsValue,
        receiver: &JsValue,
    ) -> Result<bool, ObjectError> {
        Reflect::set(heap, target, key, value, receiver)
    }
}

/// Handler overriding nothing: the virtual object mirrors its backing object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReflectHandler;

impl BackingHandler for ReflectHandler {}
