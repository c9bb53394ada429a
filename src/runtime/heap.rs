use crate::lang::value::{HeapRef, Value};

use super::runtime_error::RuntimeErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// Instance of the struct at index `ty` of the struct table.
    Struct { ty: usize, fields: Vec<Value> },
    Array(Vec<Value>),
}

impl HeapObject {
    fn cells(&self) -> usize {
        1 + match self {
            HeapObject::Struct { fields, .. } => fields.len(),
            HeapObject::Array(elems) => elems.len(),
        }
    }
}

/// Bump-allocated object heap. Objects are never freed.
#[derive(Debug, Clone)]
pub struct Heap {
    objects: Vec<HeapObject>,
    used: usize,
    capacity: usize,
}

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Heap {
            objects: Vec::new(),
            used: 0,
            capacity,
        }
    }

    /// Cells in use, counting one header cell per object.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn alloc(&mut self, object: HeapObject) -> Result<HeapRef, RuntimeErrorKind> {
        let requested = object.cells();
        let available = self.capacity.saturating_sub(self.used);
        if requested > available {
            return Err(RuntimeErrorKind::HeapExhausted {
                requested,
                available,
            });
        }
        self.used += requested;
        self.objects.push(object);
        Ok(HeapRef(self.objects.len() as u32 - 1))
    }

    /// A struct instance with every field set to null.
    pub fn alloc_struct(&mut self, ty: usize, nfields: usize) -> Result<HeapRef, RuntimeErrorKind> {
        self.alloc(HeapObject::Struct {
            ty,
            fields: vec![Value::Null; nfields],
        })
    }

    /// An array of `len` nulls.
    pub fn alloc_array(&mut self, len: i64) -> Result<HeapRef, RuntimeErrorKind> {
        let n = usize::try_from(len).map_err(|_| RuntimeErrorKind::OutOfBounds { index: len, length: 0 })?;
        // must fail before the vector is built
        if n >= self.capacity.saturating_sub(self.used) {
            return Err(RuntimeErrorKind::HeapExhausted {
                requested: n.saturating_add(1),
                available: self.capacity.saturating_sub(self.used),
            });
        }
        self.alloc(HeapObject::Array(vec![Value::Null; n]))
    }

    pub fn get(&self, r: HeapRef) -> Option<&HeapObject> {
        self.objects.get(r.0 as usize)
    }

    fn slots(&self, r: HeapRef) -> Result<&Vec<Value>, RuntimeErrorKind> {
        match self.objects.get(r.0 as usize) {
            Some(HeapObject::Struct { fields, .. }) => Ok(fields),
            Some(HeapObject::Array(elems)) => Ok(elems),
            None => Err(RuntimeErrorKind::NullReference),
        }
    }

    fn slots_mut(&mut self, r: HeapRef) -> Result<&mut Vec<Value>, RuntimeErrorKind> {
        match self.objects.get_mut(r.0 as usize) {
            Some(HeapObject::Struct { fields, .. }) => Ok(fields),
            Some(HeapObject::Array(elems)) => Ok(elems),
            None => Err(RuntimeErrorKind::NullReference),
        }
    }

    /// Field or element `index` of the object.
    pub fn load(&self, r: HeapRef, index: i64) -> Result<Value, RuntimeErrorKind> {
        let slots = self.slots(r)?;
        usize::try_from(index)
            .ok()
            .and_then(|i| slots.get(i))
            .cloned()
            .ok_or(RuntimeErrorKind::OutOfBounds {
                index,
                length: slots.len(),
            })
    }

    pub fn store(&mut self, r: HeapRef, index: i64, value: Value) -> Result<(), RuntimeErrorKind> {
        let slots = self.slots_mut(r)?;
        let length = slots.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| slots.get_mut(i))
            .ok_or(RuntimeErrorKind::OutOfBounds { index, length })?;
        *slot = value;
        Ok(())
    }
}
