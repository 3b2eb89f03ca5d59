use crate::models::error::SError;
use crate::utils::binary::{BinaryRead, BinaryWrite};
use std::fmt;
use std::io::{Read, Write};

const TAG_GLOBAL: u8 = 0;
const TAG_NAMESPACED: u8 = 1;
const TAG_NESTED: u8 = 2;
const MAX_NESTING: usize = 64;

/// Serializable identity of a type: enough to find it again inside a
/// statically inspected or a loaded assembly without holding on to it.
///
/// Nested types carry their declaring type instead of a namespace, the
/// namespace belongs to the outermost type. `name` never carries the
/// `` `N `` generic suffix, the arity is kept in `generic_arity`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeReference {
    pub declaring_type: Option<Box<TypeReference>>,
    pub namespace: Option<String>,
    pub name: String,
    pub generic_arity: u32,
}

/// Splits ``List`1`` into `("List", 1)`. Names without a numeric suffix have arity 0.
pub fn split_generic_arity(name: &str) -> (&str, u32) {
    match name.rsplit_once('`') {
        Some((base, arity)) if !base.is_empty() => match arity.parse() {
            Ok(n) => (base, n),
            Err(_) => (name, 0),
        },
        _ => (name, 0),
    }
}

impl TypeReference {
    pub fn new(namespace: Option<&str>, name: &str, generic_arity: u32) -> Self {
        Self {
            declaring_type: None,
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.to_string(),
            generic_arity,
        }
    }

    pub fn nested(declaring_type: TypeReference, name: &str, generic_arity: u32) -> Self {
        Self {
            declaring_type: Some(Box::new(declaring_type)),
            namespace: None,
            name: name.to_string(),
            generic_arity,
        }
    }

    /// Builds a reference from a raw metadata name that may carry a generic suffix.
    pub fn from_metadata_name(namespace: Option<&str>, raw_name: &str) -> Self {
        let (name, arity) = split_generic_arity(raw_name);
        Self::new(namespace, name, arity)
    }

    /// Parses `Namespace.Name`, ``Namespace.Name`1`` or `Namespace.Outer+Inner`.
    pub fn parse_full_name(full_name: &str) -> Self {
        let mut segments = full_name.split('+');
        let outer = segments.next().unwrap_or_default();
        let root = match outer.rsplit_once('.') {
            Some((ns, name)) => Self::from_metadata_name(Some(ns), name),
            None => Self::from_metadata_name(None, outer),
        };
        segments.fold(root, |declaring, raw| {
            let (name, arity) = split_generic_arity(raw);
            Self::nested(declaring, name, arity)
        })
    }

    /// Structural identity: same simple name and arity, and either the same
    /// declaring type (checked recursively) or, at the root, the same namespace.
    pub fn matches(&self, candidate: &TypeReference) -> bool {
        if self.name != candidate.name || self.generic_arity != candidate.generic_arity {
            return false;
        }
        match (&self.declaring_type, &candidate.declaring_type) {
            (Some(ours), Some(theirs)) => ours.matches(theirs),
            (None, None) => self.namespace() == candidate.namespace(),
            _ => false,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Namespace of the outermost declaring type.
    pub fn root_namespace(&self) -> Option<&str> {
        match &self.declaring_type {
            Some(declaring) => declaring.root_namespace(),
            None => self.namespace(),
        }
    }

    pub fn is_nested(&self) -> bool {
        self.declaring_type.is_some()
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        match (&self.declaring_type, self.namespace()) {
            (Some(declaring), _) => {
                w.write_u8(TAG_NESTED)?;
                declaring.write_to(w)?;
            }
            (None, Some(ns)) => {
                w.write_u8(TAG_NAMESPACED)?;
                w.write_string(ns)?;
            }
            (None, None) => w.write_u8(TAG_GLOBAL)?,
        }
        w.write_string(&self.name)?;
        w.write_i32(self.generic_arity as i32)
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, SError> {
        Self::read_nested(r, 0)
    }

    fn read_nested<R: Read + ?Sized>(r: &mut R, depth: usize) -> Result<Self, SError> {
        if depth > MAX_NESTING {
            return Err(SError::CacheFormat("type nesting is too deep".to_string()));
        }

        let (declaring_type, namespace) = match r.read_u8()? {
            TAG_GLOBAL => (None, None),
            TAG_NAMESPACED => (None, Some(r.read_string()?)),
            TAG_NESTED => (Some(Box::new(Self::read_nested(r, depth + 1)?)), None),
            tag => return Err(SError::CacheFormat(format!("unknown type reference tag {tag}"))),
        };
        let name = r.read_string()?;
        let generic_arity = u32::try_from(r.read_i32()?)
            .map_err(|_| SError::CacheFormat(format!("negative generic arity on '{name}'")))?;

        Ok(Self {
            declaring_type,
            namespace,
            name,
            generic_arity,
        })
    }
}

impl fmt::Display for TypeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.declaring_type, self.namespace()) {
            (Some(declaring), _) => write!(f, "{declaring}+")?,
            (None, Some(ns)) => write!(f, "{ns}.")?,
            (None, None) => {}
        }
        f.write_str(&self.name)?;
        if self.generic_arity > 0 {
            write!(f, "`{}", self.generic_arity)?;
        }
        Ok(())
    }
}
