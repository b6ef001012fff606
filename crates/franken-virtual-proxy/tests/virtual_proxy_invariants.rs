//! Invariant enforcement against scripted adversarial backing handlers.
//!
//! Every handler here lies in some way: forgets frozen properties, reopens
//! itself after sealing, invents keys, or re-enters the virtual object while
//! it is being consulted.  The virtual object must either hide the lie or
//! fail with an invariant violation.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use frankenengine_virtual_proxy::{
    BackingHandler, EventOutcome, InvariantViolation, JsValue, ObjectError, ObjectHandle,
    ObjectHeap, Operation, PropertyDescriptor, PropertyKey, Reflect, VirtualProxy,
    VirtualProxyConfig,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn str_key(s: &str) -> PropertyKey {
    PropertyKey::String(s.to_string())
}

fn frozen(n: i64) -> PropertyDescriptor {
    PropertyDescriptor::data_frozen(JsValue::Int(n))
}

fn pinned_writable(n: i64) -> PropertyDescriptor {
    PropertyDescriptor::Data {
        value: JsValue::Int(n),
        writable: true,
        enumerable: true,
        configurable: false,
    }
}

/// Falls back to host behaviour on the backing object unless a script entry
/// overrides the answer.
#[derive(Default)]
struct Scripted {
    descriptors: RefCell<BTreeMap<PropertyKey, Option<PropertyDescriptor>>>,
    keys: RefCell<Option<Vec<PropertyKey>>>,
    extensible: Cell<Option<bool>>,
    prevent: Cell<Option<bool>>,
    prototype: Cell<Option<Option<ObjectHandle>>>,
    has: RefCell<BTreeMap<PropertyKey, bool>>,
}

impl Scripted {
    fn report(&self, key: &str, desc: Option<PropertyDescriptor>) {
        self.descriptors.borrow_mut().insert(str_key(key), desc);
    }

    fn report_keys(&self, keys: &[&str]) {
        *self.keys.borrow_mut() = Some(keys.iter().map(|k| str_key(k)).collect());
    }
}

impl BackingHandler for Scripted {
    fn get_own_property_descriptor(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        if let Some(answer) = self.descriptors.borrow().get(key) {
            return Ok(answer.clone());
        }
        Reflect::get_own_property_descriptor(heap, target, key)
    }

    fn own_keys(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Vec<PropertyKey>, ObjectError> {
        if let Some(keys) = self.keys.borrow().as_ref() {
            return Ok(keys.clone());
        }
        Reflect::own_keys(heap, target)
    }

    fn is_extensible(&self, heap: &mut ObjectHeap, target: ObjectHandle) -> Result<bool, ObjectError> {
        match self.extensible.get() {
            Some(answer) => Ok(answer),
            None => Reflect::is_extensible(heap, target),
        }
    }

    fn prevent_extensions(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<bool, ObjectError> {
        match self.prevent.get() {
            Some(answer) => Ok(answer),
            None => Reflect::prevent_extensions(heap, target),
        }
    }

    fn get_prototype_of(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        match self.prototype.get() {
            Some(answer) => Ok(answer),
            None => Reflect::get_prototype_of(heap, target),
        }
    }

    fn has(&self, heap: &mut ObjectHeap, target: ObjectHandle, key: &PropertyKey) -> Result<bool, ObjectError> {
        if let Some(answer) = self.has.borrow().get(key) {
            return Ok(*answer);
        }
        Reflect::has(heap, target, key)
    }
}

fn scripted(heap: &mut ObjectHeap) -> (ObjectHandle, ObjectHandle, Rc<Scripted>) {
    let backing = heap.alloc_plain();
    let handler = Rc::new(Scripted::default());
    let proxy = VirtualProxy::object(heap, backing, handler.clone()).unwrap();
    (proxy, backing, handler)
}

fn violation_in(err: &ObjectError) -> Option<Operation> {
    match err {
        ObjectError::InvariantViolation(InvariantViolation { operation, .. }) => Some(*operation),
        _ => None,
    }
}

// ===========================================================================
// 1. Freeze monotonicity
// ===========================================================================

#[test]
fn frozen_descriptor_survives_backing_changes() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    handler.report("x", Some(frozen(1)));

    assert_eq!(
        Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("x")).unwrap(),
        Some(frozen(1))
    );

    handler.report("x", Some(frozen(2)));
    assert_eq!(
        Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("x")).unwrap(),
        Some(frozen(1))
    );

    handler.report("x", None);
    assert_eq!(
        Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("x")).unwrap(),
        Some(frozen(1))
    );
    assert_eq!(
        Reflect::get(&mut heap, proxy, &str_key("x"), &JsValue::Object(proxy)).unwrap(),
        JsValue::Int(1)
    );
}

#[test]
fn set_on_frozen_data_fails_after_backing_reports_writable() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    handler.report("x", Some(frozen(1)));
    Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("x")).unwrap();

    handler.report("x", Some(PropertyDescriptor::data(JsValue::Int(9))));
    let written = Reflect::set(
        &mut heap,
        proxy,
        &str_key("x"),
        JsValue::Int(2),
        &JsValue::Object(proxy),
    )
    .unwrap();
    assert!(!written);
    assert_eq!(
        Reflect::get(&mut heap, proxy, &str_key("x"), &JsValue::Object(proxy)).unwrap(),
        JsValue::Int(1)
    );
}

#[test]
fn set_on_frozen_accessor_runs_pinned_setter_after_backing_changes() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_set = Rc::clone(&seen);
    let setter = heap.alloc_function(move |_, this, args| {
        seen_set.borrow_mut().push((this.clone(), args[0].clone()));
        Ok(JsValue::Undefined)
    });
    handler.report(
        "acc",
        Some(PropertyDescriptor::Accessor {
            get: None,
            set: Some(setter),
            enumerable: true,
            configurable: false,
        }),
    );
    Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("acc")).unwrap();

    handler.report("acc", Some(PropertyDescriptor::data(JsValue::Int(9))));
    let written = Reflect::set(
        &mut heap,
        proxy,
        &str_key("acc"),
        JsValue::Int(2),
        &JsValue::Object(proxy),
    )
    .unwrap();
    assert!(written);
    assert_eq!(
        *seen.borrow(),
        vec![(JsValue::Object(proxy), JsValue::Int(2))]
    );
}

#[test]
fn pinned_property_reported_configurable_is_fatal() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    handler.report("w", Some(pinned_writable(1)));
    Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap();

    handler.report("w", Some(PropertyDescriptor::data(JsValue::Int(1))));
    let err = Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap_err();
    assert_eq!(violation_in(&err), Some(Operation::GetOwnPropertyDescriptor));
    assert_eq!(err.error_code(), "FE-VPROXY-0007");
}

#[test]
fn pinned_property_reported_with_other_kind_is_fatal() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    handler.report("w", Some(pinned_writable(1)));
    Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap();

    handler.report(
        "w",
        Some(PropertyDescriptor::Accessor {
            get: None,
            set: None,
            enumerable: true,
            configurable: false,
        }),
    );
    let err = Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap_err();
    assert!(err.is_invariant_violation());
}

#[test]
fn pinned_writable_value_may_change() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    handler.report("w", Some(pinned_writable(1)));
    Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap();
    handler.report("w", Some(pinned_writable(2)));
    assert_eq!(
        Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap(),
        Some(pinned_writable(2))
    );
    // Becoming non-writable freezes it for good.
    let read_only = PropertyDescriptor::Data {
        value: JsValue::Int(3),
        writable: false,
        enumerable: true,
        configurable: false,
    };
    handler.report("w", Some(read_only.clone()));
    Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap();
    handler.report("w", Some(pinned_writable(4)));
    assert_eq!(
        Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("w")).unwrap(),
        Some(read_only)
    );
}

// ===========================================================================
// 2. Extensibility monotonicity
// ===========================================================================

#[test]
fn sealed_key_set_ignores_backing_additions() {
    let mut heap = ObjectHeap::new();
    let (proxy, backing, handler) = scripted(&mut heap);
    heap.ordinary_mut(backing)
        .unwrap()
        .define_own_property(str_key("a"), PropertyDescriptor::data(JsValue::Int(1)));
    assert!(Reflect::prevent_extensions(&mut heap, proxy).unwrap());
    assert!(!Reflect::is_extensible(&mut heap, proxy).unwrap());

    handler.report_keys(&["a", "z", "a"]);
    assert_eq!(Reflect::own_keys(&mut heap, proxy).unwrap(), vec![str_key("a")]);
    assert!(heap.events().iter().any(|e| e.event == "ownKeys" && e.outcome == EventOutcome::Refused));
}

#[test]
fn sealed_key_set_drops_configurable_deletions() {
    let mut heap = ObjectHeap::new();
    let (proxy, backing, handler) = scripted(&mut heap);
    heap.ordinary_mut(backing)
        .unwrap()
        .define_own_property(str_key("a"), PropertyDescriptor::data(JsValue::Int(1)));
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    handler.report_keys(&[]);
    assert!(Reflect::own_keys(&mut heap, proxy).unwrap().is_empty());
    assert!(!VirtualProxy::shadow(&heap, proxy).unwrap().contains(&str_key("a")));

    // Once forgotten, the key cannot come back.
    handler.report_keys(&["a"]);
    assert!(Reflect::own_keys(&mut heap, proxy).unwrap().is_empty());
}

#[test]
fn sealed_key_set_missing_non_configurable_is_fatal() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    assert!(Reflect::define_property(&mut heap, proxy, str_key("x"), frozen(1)).unwrap());
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    handler.report_keys(&[]);
    let err = Reflect::own_keys(&mut heap, proxy).unwrap_err();
    assert_eq!(violation_in(&err), Some(Operation::OwnKeys));
}

#[test]
fn reopening_after_seal_is_fatal() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    handler.extensible.set(Some(true));
    let err = Reflect::is_extensible(&mut heap, proxy).unwrap_err();
    assert_eq!(violation_in(&err), Some(Operation::IsExtensible));

    handler.prevent.set(Some(false));
    let err = Reflect::prevent_extensions(&mut heap, proxy).unwrap_err();
    assert_eq!(violation_in(&err), Some(Operation::PreventExtensions));
}

#[test]
fn sealed_object_reports_unknown_keys_absent() {
    let mut heap = ObjectHeap::new();
    let (proxy, _, handler) = scripted(&mut heap);
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    handler.report("ghost", Some(PropertyDescriptor::data(JsValue::Int(9))));
    assert_eq!(
        Reflect::get_own_property_descriptor(&mut heap, proxy, &str_key("ghost")).unwrap(),
        None
    );
    handler.has.borrow_mut().insert(str_key("ghost"), true);
    assert!(!Reflect::has(&mut heap, proxy, &str_key("ghost")).unwrap());
    assert!(!Reflect::define_property(&mut heap, proxy, str_key("ghost"), frozen(1)).unwrap());
}

#[test]
fn sealed_has_still_sees_inherited_keys() {
    let mut heap = ObjectHeap::new();
    let proto = heap.alloc_plain();
    heap.ordinary_mut(proto)
        .unwrap()
        .define_own_property(str_key("inherited"), PropertyDescriptor::data(JsValue::Int(1)));
    let backing = heap.alloc(Some(proto));
    let handler = Rc::new(Scripted::default());
    let proxy = VirtualProxy::object(&mut heap, backing, handler).unwrap();
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    assert!(Reflect::has(&mut heap, proxy, &str_key("inherited")).unwrap());
    assert_eq!(
        Reflect::get(&mut heap, proxy, &str_key("inherited"), &JsValue::Object(proxy)).unwrap(),
        JsValue::Int(1)
    );
}

#[test]
fn sealed_prototype_ignores_backing_changes() {
    let mut heap = ObjectHeap::new();
    let proto = heap.alloc_plain();
    let other = heap.alloc_plain();
    let backing = heap.alloc(Some(proto));
    let handler = Rc::new(Scripted::default());
    let proxy = VirtualProxy::object(&mut heap, backing, handler.clone()).unwrap();
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    handler.prototype.set(Some(Some(other)));
    assert_eq!(Reflect::get_prototype_of(&mut heap, proxy).unwrap(), Some(proto));
    assert!(!Reflect::set_prototype_of(&mut heap, proxy, Some(other)).unwrap());
    assert!(Reflect::set_prototype_of(&mut heap, proxy, Some(proto)).unwrap());
}

#[test]
fn has_purges_stale_key_while_sealed() {
    let mut heap = ObjectHeap::new();
    let (proxy, backing, handler) = scripted(&mut heap);
    heap.ordinary_mut(backing)
        .unwrap()
        .define_own_property(str_key("a"), PropertyDescriptor::data(JsValue::Int(1)));
    Reflect::prevent_extensions(&mut heap, proxy).unwrap();

    handler.has.borrow_mut().insert(str_key("a"), false);
    assert!(!Reflect::has(&mut heap, proxy, &str_key("a")).unwrap());
    assert!(!VirtualProxy::shadow(&heap, proxy).unwrap().contains(&str_key("a")));
    assert!(heap.events().iter().any(|e| e.outcome == EventOutcome::Purged));
}

// ===========================================================================
// 3. Reentrancy
// ===========================================================================

#[test]
fn getter_redefining_the_same_key_is_tolerated() {
    let mut heap = ObjectHeap::new();
    let backing = heap.alloc_plain();
    let proxy = VirtualProxy::object(&mut heap, backing, Rc::new(Scripted::default())).unwrap();
    let getter = heap.alloc_function(|heap, this, _| {
        let Some(receiver) = this.as_object() else {
            return Ok(JsValue::Undefined);
        };
        Reflect::define_property(heap, receiver, PropertyKey::from("x"), frozen(5))?;
        Ok(JsValue::Int(4))
    });
    Reflect::define_property(
        &mut heap,
        proxy,
        str_key("x"),
        PropertyDescriptor::accessor(Some(getter), None),
    )
    .unwrap();

    assert_eq!(
        Reflect::get(&mut heap, proxy, &str_key("x"), &JsValue::Object(proxy)).unwrap(),
        JsValue::Int(4)
    );
    assert_eq!(
        VirtualProxy::shadow(&heap, proxy).unwrap().get(&str_key("x")),
        Some(&frozen(5))
    );
    assert_eq!(
        Reflect::get(&mut heap, proxy, &str_key("x"), &JsValue::Object(proxy)).unwrap(),
        JsValue::Int(5)
    );
}

/// Seals the virtual object from inside its own `own_keys`.
struct ReentrantSealer {
    proxy: Cell<Option<ObjectHandle>>,
    reentered: Cell<bool>,
}

impl BackingHandler for ReentrantSealer {
    fn own_keys(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Vec<PropertyKey>, ObjectError> {
        if let Some(proxy) = self.proxy.get()
            && !self.reentered.replace(true)
        {
            Reflect::prevent_extensions(heap, proxy)?;
        }
        Reflect::own_keys(heap, target)
    }
}

#[test]
fn reentrant_seal_during_synchronization_seals_once() {
    let mut heap = ObjectHeap::new();
    let backing = heap.alloc_plain();
    heap.ordinary_mut(backing)
        .unwrap()
        .define_own_property(str_key("k"), PropertyDescriptor::data(JsValue::Int(1)));
    let handler = Rc::new(ReentrantSealer {
        proxy: Cell::new(None),
        reentered: Cell::new(false),
    });
    let proxy = VirtualProxy::object(&mut heap, backing, handler.clone()).unwrap();
    handler.proxy.set(Some(proxy));

    assert!(Reflect::prevent_extensions(&mut heap, proxy).unwrap());
    let shadow = VirtualProxy::shadow(&heap, proxy).unwrap();
    assert!(shadow.is_sealed());
    assert!(shadow.contains(&str_key("k")));
    let sealed = heap
        .events()
        .iter()
        .filter(|e| e.outcome == EventOutcome::Sealed)
        .count();
    assert_eq!(sealed, 1);
}

// ===========================================================================
// 4. Dispatch depth
// ===========================================================================

/// Reports the virtual object as its own prototype.
struct SelfParent(Cell<Option<ObjectHandle>>);

impl BackingHandler for SelfParent {
    fn get_prototype_of(
        &self,
        _heap: &mut ObjectHeap,
        _target: ObjectHandle,
    ) -> Result<Option<ObjectHandle>, ObjectError> {
        Ok(self.0.get())
    }
}

#[test]
fn self_referential_prototype_hits_depth_limit() {
    let config = VirtualProxyConfig {
        max_dispatch_depth: 64,
        ..VirtualProxyConfig::default()
    };
    let mut heap = ObjectHeap::with_config(config);
    let backing = heap.alloc_plain();
    let handler = Rc::new(SelfParent(Cell::new(None)));
    let proxy = VirtualProxy::object(&mut heap, backing, handler.clone()).unwrap();
    handler.0.set(Some(proxy));

    let err = Reflect::get(&mut heap, proxy, &str_key("missing"), &JsValue::Object(proxy)).unwrap_err();
    assert!(matches!(err, ObjectError::PrototypeChainTooDeep { max: 64, .. }));
    assert_eq!(err.error_code(), "FE-VPROXY-0005");
}
