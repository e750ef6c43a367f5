//! The type model.
//!
//! Topaz-32 is an ILP32 target: `char` kinds are 1 byte, `short` kinds 2,
//! everything else (including `long` and pointers) 4.  Aggregate layout uses
//! natural alignment.  The checker registers struct/union layouts and enum
//! tags in a [TypeTable]; the later stages only ever query sizes, offsets,
//! and signedness through it.

use crate::common::*;

/// A source-language type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Type {
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Void,
    Pointer(Box<Type>),
    Array(Box<Type>, u32),
    Fun(Box<Type>, Vec<Type>),
    Struct(Id),
    Union(Id),
    Enum(Id),
}

use Type::*;

impl Type {
    pub fn ptr_to(self) -> Type {
        Pointer(Box::new(self))
    }

    pub fn array_of(self, len: u32) -> Type {
        Array(Box::new(self), len)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Array(..))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Fun(..))
    }

    pub fn is_char_like(&self) -> bool {
        matches!(self, Char | SChar | UChar)
    }

    /// Integer types, including enums (which have `int` representation).
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Char | SChar | UChar | Short | UShort | Int | UInt | Long | ULong | Enum(_)
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer()
    }

    /// Usable in a condition or as a pointer-arithmetic base.
    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_pointer()
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Struct(_) | Union(_) | Array(..))
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Char | SChar | Short | Int | Long | Enum(_))
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, UChar | UShort | UInt | ULong)
    }

    /// The pointed-to type of a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Pointer(t) => Some(t),
            _ => None,
        }
    }

    /// The element type of an array.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Array(t, _) => Some(t),
            _ => None,
        }
    }

    /// Conversion rank for the usual arithmetic conversions.
    fn rank(&self) -> u32 {
        match self {
            Char | SChar | UChar => 1,
            Short | UShort => 2,
            Int | UInt | Enum(_) => 3,
            Long | ULong => 4,
            _ => 0,
        }
    }

    /// Integer promotion: anything narrower than `int` (and enums) becomes
    /// `int`.
    pub fn promote(&self) -> Type {
        match self {
            Char | SChar | UChar | Short | UShort | Enum(_) => Int,
            other => other.clone(),
        }
    }

    fn unsigned_counterpart(&self) -> Type {
        match self {
            Int => UInt,
            Long => ULong,
            other => other.clone(),
        }
    }

    /// The usual arithmetic conversions over two integer types.
    pub fn common_type(&self, other: &Type) -> Type {
        let a = self.promote();
        let b = other.promote();
        if a == b {
            return a;
        }
        let (hi, lo) = if a.rank() >= b.rank() { (a, b) } else { (b, a) };
        if hi.is_signed() == lo.is_signed() {
            return hi;
        }
        if hi.is_unsigned() {
            return hi;
        }
        // Signed type of higher rank: on this target same-rank means same
        // width, so the signed type cannot represent the unsigned one.
        if hi.rank() > lo.rank() {
            hi
        } else {
            hi.unsigned_counterpart()
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Char => write!(f, "char"),
            SChar => write!(f, "signed char"),
            UChar => write!(f, "unsigned char"),
            Short => write!(f, "short"),
            UShort => write!(f, "unsigned short"),
            Int => write!(f, "int"),
            UInt => write!(f, "unsigned int"),
            Long => write!(f, "long"),
            ULong => write!(f, "unsigned long"),
            Void => write!(f, "void"),
            Pointer(t) => write!(f, "ptr({t})"),
            Array(t, n) => write!(f, "array({t}, {n})"),
            Fun(ret, params) => {
                write!(f, "fun({ret}, [")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "])")
            }
            Struct(tag) => write!(f, "struct {tag}"),
            Union(tag) => write!(f, "union {tag}"),
            Enum(tag) => write!(f, "enum {tag}"),
        }
    }
}

/// One member of a struct or union layout.
#[derive(Clone, Debug)]
pub struct Member {
    pub name: Id,
    pub ty: Type,
    pub offset: u32,
}

/// A computed aggregate layout.
#[derive(Clone, Debug)]
pub struct Layout {
    pub members: Vec<Member>,
    pub size: u32,
    pub align: u32,
}

/// What a tag name stands for.
#[derive(Clone, Debug)]
pub enum Tag {
    Struct(Layout),
    Union(Layout),
    Enum,
}

/// The table of named aggregate types, filled by the checker.
#[derive(Default, Debug)]
pub struct TypeTable {
    tags: Map<Id, Tag>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    pub fn define(&mut self, tag: Id, def: Tag) {
        self.tags.insert(tag, def);
    }

    pub fn lookup(&self, tag: Id) -> Option<&Tag> {
        self.tags.get(&tag)
    }

    fn layout(&self, ty: &Type) -> Option<&Layout> {
        let tag = match ty {
            Struct(tag) | Union(tag) => *tag,
            _ => return None,
        };
        match self.tags.get(&tag) {
            Some(Tag::Struct(l)) | Some(Tag::Union(l)) => Some(l),
            _ => None,
        }
    }

    /// Size of a type in bytes.  Function types have no size; they only
    /// appear behind pointers.
    pub fn size_of(&self, ty: &Type) -> u32 {
        match ty {
            Char | SChar | UChar => 1,
            Short | UShort => 2,
            Int | UInt | Long | ULong | Enum(_) => 4,
            Void => 0,
            Pointer(_) => 4,
            Array(elem, n) => self.size_of(elem) * n,
            Fun(..) => 0,
            Struct(_) | Union(_) => self.layout(ty).map(|l| l.size).unwrap_or(0),
        }
    }

    pub fn align_of(&self, ty: &Type) -> u32 {
        match ty {
            Array(elem, _) => self.align_of(elem),
            Struct(_) | Union(_) => self.layout(ty).map(|l| l.align).unwrap_or(1),
            _ => self.size_of(ty).max(1),
        }
    }

    /// Look up a member of a struct or union type.
    pub fn struct_member(&self, ty: &Type, name: Id) -> Option<&Member> {
        self.layout(ty)?.members.iter().find(|m| m.name == name)
    }

    /// Compute a struct layout from the declared member list.
    pub fn layout_struct(&self, fields: Vec<(Id, Type)>) -> Layout {
        let mut members = Vec::with_capacity(fields.len());
        let mut offset = 0u32;
        let mut align = 1u32;
        for (name, ty) in fields {
            let a = self.align_of(&ty);
            align = align.max(a);
            offset = round_up(offset, a);
            let size = self.size_of(&ty);
            members.push(Member { name, ty, offset });
            offset += size;
        }
        Layout {
            members,
            size: round_up(offset.max(1), align),
            align,
        }
    }

    /// Compute a union layout: every member at offset zero.
    pub fn layout_union(&self, fields: Vec<(Id, Type)>) -> Layout {
        let mut members = Vec::with_capacity(fields.len());
        let mut size = 0u32;
        let mut align = 1u32;
        for (name, ty) in fields {
            align = align.max(self.align_of(&ty));
            size = size.max(self.size_of(&ty));
            members.push(Member { name, ty, offset: 0 });
        }
        Layout {
            members,
            size: round_up(size.max(1), align),
            align,
        }
    }
}

fn round_up(n: u32, align: u32) -> u32 {
    (n + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn scalar_sizes_are_ilp32() {
        let t = TypeTable::new();
        assert_eq!(t.size_of(&Char), 1);
        assert_eq!(t.size_of(&UShort), 2);
        assert_eq!(t.size_of(&Int), 4);
        assert_eq!(t.size_of(&Long), 4);
        assert_eq!(t.size_of(&Int.ptr_to()), 4);
        assert_eq!(t.size_of(&Int.array_of(3)), 12);
    }

    #[test]
    fn usual_arithmetic_conversions() {
        assert_eq!(Char.common_type(&Char), Int);
        assert_eq!(Int.common_type(&UInt), UInt);
        assert_eq!(Int.common_type(&Long), Long);
        assert_eq!(UInt.common_type(&Long), ULong);
        assert_eq!(Short.common_type(&UChar), Int);
    }

    #[test]
    fn struct_layout_uses_natural_alignment() {
        let mut t = TypeTable::new();
        let layout = t.layout_struct(vec![
            (id("c"), Char),
            (id("n"), Int),
            (id("s"), Short),
        ]);
        assert_eq!(layout.members[0].offset, 0);
        assert_eq!(layout.members[1].offset, 4);
        assert_eq!(layout.members[2].offset, 8);
        assert_eq!(layout.size, 12);
        assert_eq!(layout.align, 4);
        t.define(id("p"), Tag::Struct(layout));
        let ty = Struct(id("p"));
        assert_eq!(t.size_of(&ty), 12);
        assert_eq!(t.struct_member(&ty, id("n")).unwrap().offset, 4);
    }
}
