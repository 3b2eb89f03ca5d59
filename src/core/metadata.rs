//! Static reader for the parts of ECMA-335 metadata plugin discovery needs:
//! type definitions and references, nesting, base types, assembly references
//! and string-only custom attributes. Decoding is done by `dotscope`'s raw
//! assembly view; nothing is executed.

use crate::core::type_catalog::{BaseType, TypeCatalog, TypeDescription, TypeToken};
use crate::models::error::SError;
use crate::models::type_reference::{split_generic_arity, TypeReference};
use crate::utils::asset_path::AssetPathUtility;
use dotscope::metadata::cilassemblyview::CilAssemblyView;
use dotscope::metadata::signatures::{parse_method_signature, parse_type_spec_signature, TypeSignature};
use dotscope::metadata::streams::{Blob, Strings};
use dotscope::metadata::tables::{
    AssemblyRaw, AssemblyRefRaw, CustomAttributeRaw, MemberRefRaw, MethodDefRaw, ModuleRaw,
    NestedClassRaw, TableId, TypeDefRaw, TypeRefRaw, TypeSpecRaw,
};
use dotscope::metadata::token::Token;
use dotscope::{Parser, ValidationConfig};
use goblin::pe::PE;
use std::collections::HashMap;
use tracing::trace;

const TYPE_ATTRIBUTE_INTERFACE: u32 = 0x20;
const TYPE_ATTRIBUTE_ABSTRACT: u32 = 0x80;
const MAX_NESTING: usize = 64;
const ATTRIBUTE_PROLOG: u16 = 0x0001;
const NULL_SER_STRING: u8 = 0xFF;

fn malformed(message: impl Into<String>) -> SError {
    SError::MalformedMetadata(message.into())
}

/// All rows of one table, in row order.
macro_rules! rows {
    ($tables:expr, $raw:ty) => {
        $tables
            .table::<$raw>()
            .map(|table| table.iter().collect::<Vec<$raw>>())
            .unwrap_or_default()
    };
}

#[derive(Clone, Debug)]
struct TypeDefinition {
    description: TypeDescription,
    base: Option<BaseType>,
}

#[derive(Clone, Debug)]
struct AttributeRecord {
    owner: TypeToken,
    attribute_type: TypeReference,
    arguments: Option<Vec<Option<String>>>,
}

/// Everything plugin discovery needs from one assembly image, fully owned.
/// Type tokens are 1-based `TypeDef` row numbers.
#[derive(Clone, Debug)]
pub struct MetadataCatalog {
    assembly_name: String,
    references: Vec<String>,
    types: Vec<TypeDefinition>,
    attributes: Vec<AttributeRecord>,
}

impl MetadataCatalog {
    pub fn parse(bytes: &[u8]) -> Result<Self, SError> {
        ensure_managed(bytes)?;
        // The raw view only; semantic validation would reject stripped reference assemblies.
        let view = CilAssemblyView::from_mem_with_validation(bytes.to_vec(), ValidationConfig::disabled())?;
        let tables = view.tables().ok_or_else(|| malformed("no tables stream"))?;
        let strings = view.strings().ok_or_else(|| malformed("no #Strings heap"))?;

        let builder = CatalogBuilder {
            strings,
            blobs: view.blobs(),
            type_defs: rows!(tables, TypeDefRaw),
            type_refs: rows!(tables, TypeRefRaw),
            type_specs: rows!(tables, TypeSpecRaw),
            method_defs: rows!(tables, MethodDefRaw),
            member_refs: rows!(tables, MemberRefRaw),
            custom_attributes: rows!(tables, CustomAttributeRaw),
            enclosing: rows!(tables, NestedClassRaw)
                .into_iter()
                .map(|row| (row.nested_class, row.enclosing_class))
                .collect(),
            assembly: rows!(tables, AssemblyRaw).into_iter().next(),
            module: rows!(tables, ModuleRaw).into_iter().next(),
            references: Vec::new(),
        };
        let assembly_refs = rows!(tables, AssemblyRefRaw);
        let catalog = builder.with_references(&assembly_refs)?.build()?;
        Ok(catalog)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

/// Anything that is not a PE with a CLR runtime header is a `BadImageFormat`.
fn ensure_managed(bytes: &[u8]) -> Result<(), SError> {
    let pe = PE::parse(bytes).map_err(|e| SError::BadImageFormat(e.to_string()))?;
    let clr = pe
        .header
        .optional_header
        .and_then(|header| {
            header
                .data_directories
                .get_clr_runtime_header()
                .map(|dir| (dir.virtual_address, dir.size))
        })
        .unwrap_or((0, 0));
    match clr {
        (0, _) | (_, 0) => Err(SError::BadImageFormat("not a managed assembly".to_string())),
        _ => Ok(()),
    }
}

struct CatalogBuilder<'v> {
    strings: &'v Strings<'v>,
    blobs: Option<&'v Blob<'v>>,
    type_defs: Vec<TypeDefRaw>,
    type_refs: Vec<TypeRefRaw>,
    type_specs: Vec<TypeSpecRaw>,
    method_defs: Vec<MethodDefRaw>,
    member_refs: Vec<MemberRefRaw>,
    custom_attributes: Vec<CustomAttributeRaw>,
    enclosing: HashMap<u32, u32>,
    assembly: Option<AssemblyRaw>,
    module: Option<ModuleRaw>,
    references: Vec<String>,
}

/// Row `rid` (1-based) of a collected table.
fn row<'r, T>(rows: &'r [T], rid: u32, table: &str) -> Result<&'r T, SError> {
    rid.checked_sub(1)
        .and_then(|index| rows.get(index as usize))
        .ok_or_else(|| malformed(format!("{table} row {rid} out of range")))
}

impl<'v> CatalogBuilder<'v> {
    fn with_references(mut self, assembly_refs: &[AssemblyRefRaw]) -> Result<Self, SError> {
        let references = assembly_refs
            .iter()
            .map(|row| Ok(self.string(row.name)?.to_string()))
            .collect::<Result<Vec<_>, SError>>()?;
        self.references = references;
        Ok(self)
    }

    fn string(&self, index: u32) -> Result<&'v str, SError> {
        Ok(self.strings.get(index as usize)?)
    }

    fn blob(&self, index: u32) -> Result<&'v [u8], SError> {
        let blobs = self.blobs.ok_or_else(|| malformed("no #Blob heap"))?;
        Ok(blobs.get(index as usize)?)
    }

    fn build(self) -> Result<MetadataCatalog, SError> {
        let assembly_name = self.assembly_name()?;

        let mut types = Vec::with_capacity(self.type_defs.len());
        for (index, def) in self.type_defs.iter().enumerate() {
            let base = match def.extends.row {
                0 => None,
                rid => self.base_type(def.extends.tag, rid)?,
            };
            types.push(TypeDefinition {
                description: TypeDescription {
                    reference: self.type_def_reference(index as u32 + 1, 0)?,
                    is_interface: def.flags & TYPE_ATTRIBUTE_INTERFACE != 0,
                    is_abstract: def.flags & TYPE_ATTRIBUTE_ABSTRACT != 0,
                },
                base,
            });
        }

        let mut attributes = Vec::new();
        for attribute in &self.custom_attributes {
            if attribute.parent.tag != TableId::TypeDef {
                continue;
            }
            if let Some(record) = self.attribute(attribute)? {
                attributes.push(record);
            }
        }

        Ok(MetadataCatalog {
            assembly_name,
            references: self.references,
            types,
            attributes,
        })
    }

    fn assembly_name(&self) -> Result<String, SError> {
        if let Some(assembly) = &self.assembly {
            return Ok(self.string(assembly.name)?.to_string());
        }
        // netmodules have no Assembly row
        let module = self.module.as_ref().ok_or_else(|| malformed("no Module row"))?;
        let name = self.string(module.name)?;
        Ok(AssetPathUtility::strip_known_extension(name).to_string())
    }

    fn type_def_reference(&self, rid: u32, depth: usize) -> Result<TypeReference, SError> {
        if depth > MAX_NESTING {
            return Err(malformed(format!("TypeDef {rid} nests too deeply")));
        }
        let def = row(&self.type_defs, rid, "TypeDef")?;
        let name = self.string(def.type_name)?;
        match self.enclosing.get(&rid) {
            Some(outer) => {
                let declaring = self.type_def_reference(*outer, depth + 1)?;
                let (name, arity) = split_generic_arity(name);
                Ok(TypeReference::nested(declaring, name, arity))
            }
            None => {
                let namespace = self.string(def.type_namespace)?;
                Ok(TypeReference::from_metadata_name(Some(namespace), name))
            }
        }
    }

    /// A `TypeRef` as a reference, the simple name of the assembly it points
    /// into, and whether it points back into this module.
    fn type_ref(&self, rid: u32, depth: usize) -> Result<(Option<String>, TypeReference, bool), SError> {
        if depth > MAX_NESTING {
            return Err(malformed(format!("TypeRef {rid} nests too deeply")));
        }
        let type_ref = row(&self.type_refs, rid, "TypeRef")?;
        let name = self.string(type_ref.type_name)?;
        let namespace = self.string(type_ref.type_namespace)?;
        let scope = &type_ref.resolution_scope;

        match scope.tag {
            TableId::TypeRef if scope.row != 0 => {
                let (assembly, declaring, local) = self.type_ref(scope.row, depth + 1)?;
                let (name, arity) = split_generic_arity(name);
                Ok((assembly, TypeReference::nested(declaring, name, arity), local))
            }
            TableId::AssemblyRef => {
                let assembly = scope
                    .row
                    .checked_sub(1)
                    .and_then(|i| self.references.get(i as usize))
                    .cloned();
                Ok((assembly, TypeReference::from_metadata_name(Some(namespace), name), false))
            }
            TableId::Module => Ok((None, TypeReference::from_metadata_name(Some(namespace), name), true)),
            _ => Ok((None, TypeReference::from_metadata_name(Some(namespace), name), false)),
        }
    }

    fn base_type(&self, table: TableId, rid: u32) -> Result<Option<BaseType>, SError> {
        match table {
            TableId::TypeDef => Ok(Some(BaseType::Defined(rid))),
            TableId::TypeRef => {
                let (assembly, reference, local) = self.type_ref(rid, 0)?;
                if local {
                    if let Some(token) = self.find_local(&reference)? {
                        return Ok(Some(BaseType::Defined(token)));
                    }
                }
                Ok(Some(BaseType::Foreign {
                    assembly,
                    reference,
                }))
            }
            TableId::TypeSpec => {
                let spec = row(&self.type_specs, rid, "TypeSpec")?;
                match generic_instance_target(self.blob(spec.signature)?)? {
                    Some((table, rid)) => self.base_type(table, rid),
                    None => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn find_local(&self, reference: &TypeReference) -> Result<Option<TypeToken>, SError> {
        for rid in 1..=self.type_defs.len() as u32 {
            if self.type_def_reference(rid, 0)?.matches(reference) {
                return Ok(Some(rid));
            }
        }
        Ok(None)
    }

    /// Owning `TypeDef` of a `MethodDef`, from the `MethodList` runs.
    fn method_owner(&self, method: u32) -> Option<u32> {
        let index = self.type_defs.partition_point(|def| def.method_list <= method);
        // Types with empty method lists share their start with the next type.
        (index > 0).then_some(index as u32)
    }

    fn attribute(&self, attribute: &CustomAttributeRaw) -> Result<Option<AttributeRecord>, SError> {
        let constructor = &attribute.constructor;
        let (attribute_type, signature) = match constructor.tag {
            TableId::MethodDef => {
                let Some(declaring) = self.method_owner(constructor.row) else {
                    return Ok(None);
                };
                let method = row(&self.method_defs, constructor.row, "MethodDef")?;
                (self.type_def_reference(declaring, 0)?, self.blob(method.signature)?)
            }
            TableId::MemberRef => {
                let member = row(&self.member_refs, constructor.row, "MemberRef")?;
                let declaring = match member.class.tag {
                    TableId::TypeRef => self.type_ref(member.class.row, 0)?.1,
                    TableId::TypeDef => self.type_def_reference(member.class.row, 0)?,
                    _ => return Ok(None),
                };
                (declaring, self.blob(member.signature)?)
            }
            _ => return Ok(None),
        };

        let arguments = match string_ctor_arity(signature)? {
            Some(count) => match self.blob(attribute.value).and_then(|value| string_arguments(value, count)) {
                Ok(args) => Some(args),
                Err(e) => {
                    trace!(attribute = %attribute_type, "unreadable attribute value: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(Some(AttributeRecord {
            owner: attribute.parent.row,
            attribute_type,
            arguments,
        }))
    }
}

/// Number of parameters of an instance constructor whose parameters are all
/// `string`. Any other shape is `None`: such attributes cannot carry a
/// `(guid, name, version)` triple.
fn string_ctor_arity(signature: &[u8]) -> Result<Option<usize>, SError> {
    let method = parse_method_signature(signature)?;
    if !method.has_this || method.param_count_generic != 0 {
        return Ok(None);
    }
    if !matches!(method.return_type.base, TypeSignature::Void) {
        return Ok(None);
    }
    let all_strings = method.params.len() == method.param_count as usize
        && method
            .params
            .iter()
            .all(|p| !p.by_ref && matches!(p.base, TypeSignature::String));
    Ok(all_strings.then_some(method.params.len()))
}

/// Fixed `string` arguments of a custom attribute value blob.
fn string_arguments(value: &[u8], count: usize) -> Result<Vec<Option<String>>, SError> {
    let mut parser = Parser::new(value);
    let prolog = parser.read_le::<u16>()?;
    if prolog != ATTRIBUTE_PROLOG {
        return Err(malformed(format!("custom attribute prolog {prolog:#06x}")));
    }
    (0..count)
        .map(|_| {
            if parser.peek_byte()? == NULL_SER_STRING {
                parser.advance()?;
                return Ok(None);
            }
            Ok(Some(parser.read_compressed_string_utf8()?))
        })
        .collect()
}

/// For a `GENERICINST` type spec, the generic type definition it instantiates.
/// Other type specs have no nominal base.
fn generic_instance_target(spec: &[u8]) -> Result<Option<(TableId, u32)>, SError> {
    let TypeSignature::GenericInst(definition, _) = parse_type_spec_signature(spec)?.base else {
        return Ok(None);
    };
    let token: Token = match *definition {
        TypeSignature::Class(token) | TypeSignature::ValueType(token) => token,
        _ => return Ok(None),
    };
    let table = match token.table() {
        0x02 => TableId::TypeDef,
        0x01 => TableId::TypeRef,
        _ => return Ok(None),
    };
    Ok((token.row() != 0).then_some((table, token.row())))
}

impl TypeCatalog for MetadataCatalog {
    fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    fn referenced_assemblies(&self) -> &[String] {
        &self.references
    }

    fn defined_types(&self) -> Vec<TypeToken> {
        (1..=self.types.len() as TypeToken).collect()
    }

    fn describe(&self, ty: TypeToken) -> Option<&TypeDescription> {
        let index = (ty as usize).checked_sub(1)?;
        self.types.get(index).map(|t| &t.description)
    }

    fn base_type(&self, ty: TypeToken) -> Option<BaseType> {
        let index = (ty as usize).checked_sub(1)?;
        self.types.get(index)?.base.clone()
    }

    fn attribute_arguments(
        &self,
        ty: TypeToken,
        attribute: &TypeReference,
    ) -> Option<Vec<Option<String>>> {
        self.attributes
            .iter()
            .filter(|a| a.owner == ty && attribute.matches(&a.attribute_type))
            .find_map(|a| a.arguments.clone())
    }
}
