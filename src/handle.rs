//! Reusable typed cursor over one component element inside a chunk column.

use crate::layout::{ComponentDescriptor, Primitive};

/// Cursor bound to a single component element.
///
/// Field access is by index; resolve names once at setup time with
/// [`field_index`](ComponentHandle::field_index). Reads and writes are
/// unaligned, since column elements are tightly strided.
///
/// Handles are rebound as iteration advances; consumers must not retain one
/// past the call that received it.
pub struct ComponentHandle<'a> {
    descriptor: &'a ComponentDescriptor,
    ptr: *mut u8,
}

impl<'a> ComponentHandle<'a> {
    pub(crate) fn unbound(descriptor: &'a ComponentDescriptor) -> Self {
        ComponentHandle {
            descriptor,
            ptr: std::ptr::null_mut(),
        }
    }

    /// Rebind the cursor to a new element.
    ///
    /// # Safety
    ///
    /// `ptr` must point at `descriptor.total_size()` writable bytes that
    /// stay valid while the handle is used, and no other thread may touch
    /// them during that time.
    pub(crate) unsafe fn bind(&mut self, ptr: *mut u8) {
        self.ptr = ptr;
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        self.descriptor
    }

    /// Setup-time field name resolution.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.descriptor.field_index(name)
    }

    /// Whole element as bytes.
    pub fn bytes(&self) -> &[u8] {
        debug_assert!(!self.ptr.is_null());
        unsafe { std::slice::from_raw_parts(self.ptr, self.descriptor.total_size()) }
    }

    /// Overwrite the element, bounded by `min(element_size, src.len())`.
    pub fn write_bytes(&mut self, src: &[u8]) {
        debug_assert!(!self.ptr.is_null());
        let len = self.descriptor.total_size().min(src.len());
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr, len) }
    }

    pub fn get_bool(&self, field: usize) -> bool {
        self.read::<u8>(field, 1) != 0
    }

    pub fn set_bool(&mut self, field: usize, value: bool) {
        self.write::<u8>(field, 1, value as u8)
    }

    pub fn get_i8(&self, field: usize) -> i8 {
        self.read(field, 1)
    }

    pub fn set_i8(&mut self, field: usize, value: i8) {
        self.write(field, 1, value)
    }

    pub fn get_i16(&self, field: usize) -> i16 {
        self.read(field, 2)
    }

    pub fn set_i16(&mut self, field: usize, value: i16) {
        self.write(field, 2, value)
    }

    pub fn get_i32(&self, field: usize) -> i32 {
        self.read(field, 4)
    }

    pub fn set_i32(&mut self, field: usize, value: i32) {
        self.write(field, 4, value)
    }

    pub fn get_i64(&self, field: usize) -> i64 {
        self.read(field, 8)
    }

    pub fn set_i64(&mut self, field: usize, value: i64) {
        self.write(field, 8, value)
    }

    pub fn get_f32(&self, field: usize) -> f32 {
        self.read(field, 4)
    }

    pub fn set_f32(&mut self, field: usize, value: f32) {
        self.write(field, 4, value)
    }

    pub fn get_f64(&self, field: usize) -> f64 {
        self.read(field, 8)
    }

    pub fn set_f64(&mut self, field: usize, value: f64) {
        self.write(field, 8, value)
    }

    pub fn get_char(&self, field: usize) -> char {
        std::char::from_u32(self.read::<u32>(field, 4)).unwrap_or('\u{0}')
    }

    pub fn set_char(&mut self, field: usize, value: char) {
        self.write(field, 4, value as u32)
    }

    /// Raw view of one field's bytes; the escape hatch for `Struct` fields.
    pub fn field_bytes(&self, field: usize) -> &[u8] {
        debug_assert!(!self.ptr.is_null());
        let field = self.descriptor.field(field);
        unsafe { std::slice::from_raw_parts(self.ptr.add(field.offset), field.size) }
    }

    pub fn set_field_bytes(&mut self, field: usize, src: &[u8]) {
        debug_assert!(!self.ptr.is_null());
        let field = self.descriptor.field(field);
        let len = field.size.min(src.len());
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(field.offset), len) }
    }

    fn read<T: Copy>(&self, field: usize, size: usize) -> T {
        debug_assert!(!self.ptr.is_null());
        let field = self.descriptor.field(field);
        debug_assert!(field.size >= size);
        debug_assert!(field.offset + size <= self.descriptor.total_size());
        unsafe { (self.ptr.add(field.offset) as *const T).read_unaligned() }
    }

    fn write<T: Copy>(&mut self, field: usize, size: usize, value: T) {
        debug_assert!(!self.ptr.is_null());
        let field = self.descriptor.field(field);
        debug_assert!(field.size >= size);
        debug_assert!(field.offset + size <= self.descriptor.total_size());
        unsafe { (self.ptr.add(field.offset) as *mut T).write_unaligned(value) }
    }
}
