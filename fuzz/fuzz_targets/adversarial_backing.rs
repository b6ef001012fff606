#![no_main]

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use frankenengine_virtual_proxy::descriptor;
use frankenengine_virtual_proxy::{
    BackingHandler, JsValue, ObjectError, ObjectHandle, ObjectHeap, PropertyDescriptor,
    PropertyKey, Reflect, VirtualProxy, VirtualProxyConfig,
};
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 96;
const KEYS: [&str; 4] = ["a", "b", "c", "d"];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    run_program(data);
});

/// Answers from a byte tape: roughly one answer in three is made up, the
/// rest come from the backing object.
struct Chaos {
    tape: Vec<u8>,
    cursor: Cell<usize>,
}

impl Chaos {
    fn next(&self) -> u8 {
        let index = self.cursor.get();
        self.cursor.set(index.saturating_add(1));
        byte(&self.tape, index)
    }

    fn lies(&self) -> bool {
        self.next() % 3 == 0
    }
}

impl BackingHandler for Chaos {
    fn define_property(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        if self.lies() {
            return Ok(self.next() % 2 == 0);
        }
        Reflect::define_property(heap, target, key, desc)
    }

    fn get_own_property_descriptor(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        if self.lies() {
            return Ok(make_descriptor(self.next()));
        }
        Reflect::get_own_property_descriptor(heap, target, key)
    }

    fn delete_property(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
        key: &PropertyKey,
    ) -> Result<bool, ObjectError> {
        if self.lies() {
            return Ok(self.next() % 2 == 0);
        }
        Reflect::delete_property(heap, target, key)
    }

    fn own_keys(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<Vec<PropertyKey>, ObjectError> {
        if self.lies() {
            let count = usize::from(self.next() % 6);
            return Ok((0..count).map(|_| make_key(self.next())).collect());
        }
        Reflect::own_keys(heap, target)
    }

    fn is_extensible(&self, heap: &mut ObjectHeap, target: ObjectHandle) -> Result<bool, ObjectError> {
        if self.lies() {
            return Ok(self.next() % 2 == 0);
        }
        Reflect::is_extensible(heap, target)
    }

    fn prevent_extensions(
        &self,
        heap: &mut ObjectHeap,
        target: ObjectHandle,
    ) -> Result<bool, ObjectError> {
        if self.lies() {
            return Ok(self.next() % 2 == 0);
        }
        Reflect::prevent_extensions(heap, target)
    }

    fn has(&self, heap: &mut ObjectHeap, target: ObjectHandle, key: &PropertyKey) -> Result<bool, ObjectError> {
        if self.lies() {
            return Ok(self.next() % 2 == 0);
        }
        Reflect::has(heap, target, key)
    }
}

fn run_program(data: &[u8]) {
    let config = VirtualProxyConfig {
        trace_id: "fuzz-virtual-proxy".to_string(),
        record_events: false,
        max_dispatch_depth: 256,
        ..VirtualProxyConfig::default()
    };
    let mut heap = ObjectHeap::with_config(config);
    let backing = heap.alloc_plain();
    let handler = Rc::new(Chaos {
        tape: data.to_vec(),
        cursor: Cell::new(usize::from(byte(data, 0))),
    });
    let Ok(proxy) = VirtualProxy::object(&mut heap, backing, handler) else {
        return;
    };
    let receiver = JsValue::Object(proxy);

    let mut frozen: BTreeMap<PropertyKey, PropertyDescriptor> = BTreeMap::new();
    let mut reported_sealed = false;
    let mut cursor = 1usize;
    for _ in 0..MAX_STEPS {
        let opcode = byte(data, cursor);
        let key = make_key(byte(data, cursor.saturating_add(1)));
        cursor = cursor.saturating_add(2);

        match opcode % 8 {
            0 => {
                let desc = make_descriptor(byte(data, cursor)).unwrap_or_else(descriptor::placeholder);
                cursor = cursor.saturating_add(1);
                let _ = Reflect::define_property(&mut heap, proxy, key, desc);
            }
            1 => {
                let _ = Reflect::delete_property(&mut heap, proxy, &key);
            }
            2 => {
                if let Ok(keys) = Reflect::own_keys(&mut heap, proxy)
                    && reported_sealed
                {
                    let unique: BTreeSet<&PropertyKey> = keys.iter().collect();
                    assert_eq!(unique.len(), keys.len(), "duplicate keys after sealing");
                    if let Ok(shadow) = VirtualProxy::shadow(&heap, proxy) {
                        assert!(keys.iter().all(|k| shadow.contains(k)), "key invented after sealing");
                    }
                }
            }
            3 => {
                if let Ok(extensible) = Reflect::is_extensible(&mut heap, proxy) {
                    assert!(!(reported_sealed && extensible), "extensible again after sealing");
                    reported_sealed |= !extensible;
                }
            }
            4 => {
                if let Ok(true) = Reflect::prevent_extensions(&mut heap, proxy) {
                    reported_sealed = true;
                }
            }
            5 => {
                let _ = Reflect::has(&mut heap, proxy, &key);
            }
            6 => {
                let value = JsValue::Int(i64::from(byte(data, cursor)));
                cursor = cursor.saturating_add(1);
                let _ = Reflect::set(&mut heap, proxy, &key, value, &receiver);
            }
            _ => {
                let _ = Reflect::get(&mut heap, proxy, &key, &receiver);
            }
        }

        // Freeze monotonicity, checked on every key after every step.
        for name in KEYS {
            let key = PropertyKey::from(name);
            let Ok(answer) = Reflect::get_own_property_descriptor(&mut heap, proxy, &key) else {
                continue;
            };
            match (frozen.get(&key), answer) {
                (Some(pinned), answer) => {
                    assert_eq!(answer.as_ref(), Some(pinned), "frozen descriptor changed");
                }
                (None, Some(desc)) if descriptor::is_frozen(&desc) => {
                    frozen.insert(key, desc);
                }
                (None, Some(_)) if reported_sealed => {
                    if let Ok(shadow) = VirtualProxy::shadow(&heap, proxy) {
                        assert!(shadow.contains(&key), "unknown key reported after sealing");
                    }
                }
                _ => {}
            }
        }
    }
}

fn make_key(value: u8) -> PropertyKey {
    PropertyKey::from(KEYS[usize::from(value) % KEYS.len()])
}

fn make_descriptor(value: u8) -> Option<PropertyDescriptor> {
    if value % 5 == 0 {
        return None;
    }
    let flags = value >> 2;
    Some(PropertyDescriptor::Data {
        value: JsValue::Int(i64::from(value % 4)),
        writable: flags & 1 != 0,
        enumerable: flags & 2 != 0,
        configurable: flags & 4 != 0,
    })
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
