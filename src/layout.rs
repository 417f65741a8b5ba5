//! Component field descriptions and the byte-level layout resolver.
//!
//! A component's storage shape is described declaratively as an ordered list
//! of fields. The resolver turns that description into a frozen
//! [`ComponentDescriptor`] with concrete offsets, sizes and alignments, which
//! the chunk storage and [`ComponentHandle`](crate::ComponentHandle) consume.

use crate::error::{Error, Result};

/// Primitive kinds a component field may have.
///
/// `Struct` is a nested fixed-size record; it has no natural size and must
/// declare one explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Char,
    Struct,
}

impl Primitive {
    /// Natural size in bytes, or `None` for `Struct`.
    pub fn natural_size(self) -> Option<usize> {
        match self {
            Primitive::Bool | Primitive::I8 => Some(1),
            Primitive::I16 => Some(2),
            Primitive::I32 | Primitive::F32 | Primitive::Char => Some(4),
            Primitive::I64 | Primitive::F64 => Some(8),
            Primitive::Struct => None,
        }
    }

    /// Natural alignment in bytes, or `None` for `Struct`.
    pub fn natural_align(self) -> Option<usize> {
        self.natural_size()
    }
}

/// How field offsets are assigned by the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutStrategy {
    /// Fields packed tightly in declaration order, no padding.
    Sequential,
    /// Each field offset rounded up to the field's alignment,
    /// total size rounded up to the maximum alignment.
    Padding,
    /// Declared offsets used verbatim; non-overlap is validated.
    Explicit,
}

/// Storage classification of a registered component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// Per-entity byte payload stored in archetype chunk columns.
    Unmanaged,
    /// Per-entity opaque object stored by ticket in the managed store.
    Managed,
    /// Per-chunk-group 64-bit value.
    UnmanagedShared,
    /// Per-chunk-group deduplicated opaque value, stored by index.
    ManagedShared,
}

/// Declarative field description consumed by the resolver.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub primitive: Primitive,
    /// Overrides the primitive's natural size when set.
    pub size: Option<usize>,
    /// Only meaningful under `LayoutStrategy::Explicit`.
    pub offset: Option<usize>,
    /// Overrides the primitive's natural alignment when set.
    pub align: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: &'static str, primitive: Primitive) -> Self {
        FieldSpec {
            name,
            primitive,
            size: None,
            offset: None,
            align: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = Some(align);
        self
    }
}

/// A resolved field: concrete byte range within the component payload.
#[derive(Clone, Copy, Debug)]
pub struct ComponentField {
    pub name: &'static str,
    pub primitive: Primitive,
    pub offset: usize,
    pub size: usize,
    pub align: usize,
}

/// Frozen byte-level layout of one component type.
#[derive(Clone, Debug)]
pub struct ComponentDescriptor {
    kind: ComponentKind,
    total_size: usize,
    fields: Box<[ComponentField]>,
    strategy: LayoutStrategy,
}

impl ComponentDescriptor {
    /// Resolve a field description into a frozen descriptor.
    ///
    /// `total_size` overrides the computed size when provided; it must not be
    /// smaller than the computed minimum.
    pub fn resolve(
        kind: ComponentKind,
        strategy: LayoutStrategy,
        specs: &[FieldSpec],
        total_size: Option<usize>,
    ) -> Result<Self> {
        if specs.is_empty() {
            if let Some(size) = total_size {
                if size != 0 {
                    return Err(Error::InvalidLayout(format!(
                        "total size {} declared for a component with no fields",
                        size
                    )));
                }
            }
            return Ok(ComponentDescriptor {
                kind,
                total_size: 0,
                fields: Box::new([]),
                strategy,
            });
        }

        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            let size = match spec.size {
                Some(0) => {
                    return Err(Error::InvalidLayout(format!(
                        "field `{}` declares zero size",
                        spec.name
                    )))
                }
                Some(size) => size,
                None => spec.primitive.natural_size().ok_or_else(|| {
                    Error::InvalidLayout(format!(
                        "struct field `{}` requires an explicit size",
                        spec.name
                    ))
                })?,
            };
            let align = match spec.align {
                Some(0) => {
                    return Err(Error::InvalidLayout(format!(
                        "field `{}` declares zero alignment",
                        spec.name
                    )))
                }
                Some(align) if !align.is_power_of_two() => {
                    return Err(Error::InvalidLayout(format!(
                        "field `{}` alignment {} is not a power of two",
                        spec.name, align
                    )))
                }
                Some(align) => align,
                None => spec.primitive.natural_align().unwrap_or(1),
            };
            fields.push(ComponentField {
                name: spec.name,
                primitive: spec.primitive,
                offset: spec.offset.unwrap_or(0),
                size,
                align,
            });
        }

        let min_size = match strategy {
            LayoutStrategy::Sequential => {
                let mut offset = 0;
                for field in fields.iter_mut() {
                    field.offset = offset;
                    offset += field.size;
                }
                offset
            }
            LayoutStrategy::Padding => {
                let mut offset = 0;
                let mut max_align = 1;
                for field in fields.iter_mut() {
                    offset = round_up(offset, field.align);
                    field.offset = offset;
                    offset += field.size;
                    max_align = max_align.max(field.align);
                }
                round_up(offset, max_align)
            }
            LayoutStrategy::Explicit => {
                for (spec, field) in specs.iter().zip(fields.iter_mut()) {
                    field.offset = spec.offset.ok_or_else(|| {
                        Error::InvalidLayout(format!(
                            "explicit layout field `{}` has no declared offset",
                            field.name
                        ))
                    })?;
                }
                fields.sort_by_key(|f| f.offset);
                for pair in fields.windows(2) {
                    if pair[0].offset + pair[0].size > pair[1].offset {
                        return Err(Error::InvalidLayout(format!(
                            "fields `{}` and `{}` overlap",
                            pair[0].name, pair[1].name
                        )));
                    }
                }
                let last = fields.last().expect("explicit layout has at least one field");
                last.offset + last.size
            }
        };

        let total = match total_size {
            Some(size) if size < min_size => {
                return Err(Error::InvalidLayout(format!(
                    "declared total size {} is smaller than computed minimum {}",
                    size, min_size
                )))
            }
            Some(size) => size,
            None => min_size,
        };

        Ok(ComponentDescriptor {
            kind,
            total_size: total,
            fields: fields.into_boxed_slice(),
            strategy,
        })
    }

    /// Fluent construction of unmanaged-instance descriptors.
    pub fn builder() -> DescriptorBuilder {
        DescriptorBuilder {
            strategy: LayoutStrategy::Sequential,
            fields: Vec::new(),
            total_size: None,
        }
    }

    /// Descriptor for a managed-instance component; carries no byte payload.
    pub fn managed() -> Self {
        ComponentDescriptor {
            kind: ComponentKind::Managed,
            total_size: 0,
            fields: Box::new([]),
            strategy: LayoutStrategy::Sequential,
        }
    }

    /// Descriptor for a managed-shared component; carries no byte payload.
    pub fn managed_shared() -> Self {
        ComponentDescriptor {
            kind: ComponentKind::ManagedShared,
            total_size: 0,
            fields: Box::new([]),
            strategy: LayoutStrategy::Sequential,
        }
    }

    /// Descriptor for an unmanaged-shared component: a single 64-bit value.
    pub fn shared_value() -> Self {
        ComponentDescriptor {
            kind: ComponentKind::UnmanagedShared,
            total_size: 8,
            fields: Box::new([ComponentField {
                name: "value",
                primitive: Primitive::I64,
                offset: 0,
                size: 8,
                align: 8,
            }]),
            strategy: LayoutStrategy::Sequential,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn strategy(&self) -> LayoutStrategy {
        self.strategy
    }

    pub fn fields(&self) -> &[ComponentField] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> &ComponentField {
        &self.fields[index]
    }

    /// Setup-time name resolution; hot paths use the returned index.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Largest field alignment, at least 1.
    pub fn max_align(&self) -> usize {
        self.fields.iter().map(|f| f.align).max().unwrap_or(1)
    }
}

/// Builder for unmanaged-instance descriptors.
pub struct DescriptorBuilder {
    strategy: LayoutStrategy,
    fields: Vec<FieldSpec>,
    total_size: Option<usize>,
}

impl DescriptorBuilder {
    pub fn strategy(mut self, strategy: LayoutStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn field(mut self, name: &'static str, primitive: Primitive) -> Self {
        self.fields.push(FieldSpec::new(name, primitive));
        self
    }

    pub fn field_spec(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn total_size(mut self, size: usize) -> Self {
        self.total_size = Some(size);
        self
    }

    pub fn resolve(self) -> Result<ComponentDescriptor> {
        ComponentDescriptor::resolve(
            ComponentKind::Unmanaged,
            self.strategy,
            &self.fields,
            self.total_size,
        )
    }
}

fn round_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
