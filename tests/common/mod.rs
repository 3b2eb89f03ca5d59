#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use mod_loader_lib::config::LoaderSettings;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const FRAMEWORK: &str = "ModLoader.Framework";

/// Temp dir plus its UTF-8 path.
pub fn temp_root() -> (TempDir, Utf8PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
    (tmp, root)
}

/// Settings that keep every file inside `root`.
pub fn settings_in(root: &Utf8Path) -> LoaderSettings {
    let mut settings = LoaderSettings::default();
    settings.mods_directory = root.join("mods");
    settings.cache.enabled = true;
    settings.cache.path = root.join("cache").join("assemblies.bin");
    settings.reference_assemblies = None;
    settings.log.directory = None;
    settings
}

/// A mod package on disk, described fluently.
#[derive(Clone, Default)]
pub struct ModFixture {
    pub guid: String,
    pub name: String,
    pub version: String,
    pub dependencies: Vec<Value>,
    pub incompatibilities: Vec<Value>,
    pub assets: serde_json::Map<String, Value>,
    pub assemblies: Vec<(String, Vec<u8>)>,
    pub bundles: Vec<(String, Vec<u8>)>,
    pub readme: Option<String>,
    pub icon: Option<Vec<u8>>,
    pub raw_manifest: Option<String>,
}

impl ModFixture {
    pub fn new(guid: &str) -> Self {
        Self {
            guid: guid.to_string(),
            name: guid.rsplit('.').next().unwrap_or(guid).to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn depends_on(mut self, guid: &str) -> Self {
        self.dependencies.push(json!({ "guid": guid }));
        self
    }

    pub fn depends_on_versions(mut self, guid: &str, versions: &[&str]) -> Self {
        self.dependencies.push(json!({ "guid": guid, "versions": versions }));
        self
    }

    pub fn optionally_depends_on(mut self, guid: &str) -> Self {
        self.dependencies.push(json!({ "guid": guid, "required": false }));
        self
    }

    pub fn incompatible_with(mut self, guid: &str) -> Self {
        self.incompatibilities.push(json!({ "guid": guid }));
        self
    }

    pub fn assembly(mut self, file: &str, bytes: Vec<u8>) -> Self {
        self.assemblies.push((format!("Assemblies/{file}"), bytes));
        self
    }

    pub fn bundle(mut self, file: &str, bytes: &[u8]) -> Self {
        self.bundles.push((format!("Asset Bundles/{file}"), bytes.to_vec()));
        self
    }

    pub fn asset_settings(mut self, path: &str, priority: i32, asset_type: &str, manual: bool) -> Self {
        self.assets.insert(
            path.to_string(),
            json!({ "loadPriority": priority, "type": asset_type, "loadManually": manual }),
        );
        self
    }

    pub fn readme(mut self, text: &str) -> Self {
        self.readme = Some(text.to_string());
        self
    }

    pub fn icon(mut self, bytes: &[u8]) -> Self {
        self.icon = Some(bytes.to_vec());
        self
    }

    /// Replaces the generated manifest with arbitrary text.
    pub fn manifest_text(mut self, text: &str) -> Self {
        self.raw_manifest = Some(text.to_string());
        self
    }

    pub fn manifest_json(&self) -> String {
        if let Some(raw) = &self.raw_manifest {
            return raw.clone();
        }
        json!({
            "guid": self.guid,
            "name": self.name,
            "version": self.version,
            "author": "tests",
            "assets": self.assets,
            "dependencies": self.dependencies,
            "incompatibilities": self.incompatibilities,
        })
        .to_string()
    }

    fn files(&self) -> Vec<(String, Vec<u8>)> {
        let mut files = vec![("manifest.json".to_string(), self.manifest_json().into_bytes())];
        if let Some(readme) = &self.readme {
            files.push(("README.md".to_string(), readme.clone().into_bytes()));
        }
        if let Some(icon) = &self.icon {
            files.push(("icon.png".to_string(), icon.clone()));
        }
        files.extend(self.assemblies.iter().cloned());
        files.extend(self.bundles.iter().cloned());
        files
    }

    /// Writes the package as `<parent>/<dir_name>/...`.
    pub fn write_dir(&self, parent: &Utf8Path, dir_name: &str) -> Utf8PathBuf {
        let root = parent.join(dir_name);
        for (path, bytes) in self.files() {
            let target = root.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, bytes).unwrap();
        }
        root
    }

    /// Writes the package as a zip with everything under `prefix`.
    pub fn write_zip(&self, path: &Utf8Path, prefix: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
        for (name, bytes) in self.files() {
            zip.start_file(format!("{prefix}{name}"), SimpleFileOptions::default())
                .unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.finish().unwrap();
    }
}

/// Plugin assembly whose single class derives from the framework's root
/// plugin and carries a full plugin attribute.
pub fn root_plugin_assembly(assembly: &str, namespace: &str, class: &str, guid: &str, version: &str) -> Vec<u8> {
    let mut image = AssemblyImageBuilder::new(assembly);
    let framework = image.assembly_ref(FRAMEWORK);
    let root = image.type_ref(framework, "ModLoader", "RootPlugin");
    let attribute = image.type_ref(framework, "ModLoader", "PluginAttribute");
    let entry = image.class(namespace, class, Base::Ref(root));
    image.attribute(entry, attribute, &[guid, class, version]);
    image.build()
}

/// Assembly with no plugin types at all.
pub fn library_assembly(assembly: &str, references: &[&str]) -> Vec<u8> {
    let mut image = AssemblyImageBuilder::new(assembly);
    let corlib = image.assembly_ref("mscorlib");
    for reference in references {
        image.assembly_ref(reference);
    }
    let object = image.type_ref(corlib, "System", "Object");
    image.class(assembly, "Helpers", Base::Ref(object));
    image.build()
}

#[derive(Clone, Copy, Debug)]
pub enum Base {
    None,
    Def(u32),
    Ref(u32),
    Spec(u32),
}

struct TypeDefRow {
    flags: u32,
    namespace: String,
    name: String,
    base: Base,
    enclosing: Option<u32>,
}

struct AttributeRow {
    owner: u32,
    constructor: u32,
    value: Vec<u8>,
}

pub const TYPE_ABSTRACT: u32 = 0x80;
pub const TYPE_INTERFACE: u32 = 0x20 | 0x80;

/// Builds a minimal PE32 image with CLI metadata: enough tables for type
/// definitions, references, nesting and string-only custom attributes.
pub struct AssemblyImageBuilder {
    name: String,
    references: Vec<String>,
    type_refs: Vec<(u32, String, String)>,
    types: Vec<TypeDefRow>,
    constructors: Vec<(u32, Vec<u8>)>,
    attributes: Vec<AttributeRow>,
    type_specs: Vec<Vec<u8>>,
    managed: bool,
}

impl AssemblyImageBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            references: Vec::new(),
            type_refs: Vec::new(),
            types: Vec::new(),
            constructors: Vec::new(),
            attributes: Vec::new(),
            type_specs: Vec::new(),
            managed: true,
        }
    }

    /// Drops the CLI directory, leaving a plain native image.
    pub fn native(mut self) -> Self {
        self.managed = false;
        self
    }

    /// 1-based `AssemblyRef` row.
    pub fn assembly_ref(&mut self, name: &str) -> u32 {
        if let Some(i) = self.references.iter().position(|r| r == name) {
            return i as u32 + 1;
        }
        self.references.push(name.to_string());
        self.references.len() as u32
    }

    /// 1-based `TypeRef` row scoped to an assembly reference.
    pub fn type_ref(&mut self, assembly: u32, namespace: &str, name: &str) -> u32 {
        // ResolutionScope: AssemblyRef tag 2
        self.type_refs.push(((assembly << 2) | 2, namespace.to_string(), name.to_string()));
        self.type_refs.len() as u32
    }

    /// `TypeRef` nested inside another `TypeRef`.
    pub fn nested_type_ref(&mut self, declaring: u32, name: &str) -> u32 {
        self.type_refs.push(((declaring << 2) | 3, String::new(), name.to_string()));
        self.type_refs.len() as u32
    }

    /// `TypeRef` resolved inside this module.
    pub fn local_type_ref(&mut self, namespace: &str, name: &str) -> u32 {
        // Module row 1, tag 0
        self.type_refs.push((1 << 2, namespace.to_string(), name.to_string()));
        self.type_refs.len() as u32
    }

    /// `TypeSpec` instantiating a generic type with one `object` argument.
    pub fn generic_instance(&mut self, definition: Base) -> u32 {
        let encoded = match definition {
            Base::Def(rid) => rid << 2,
            Base::Ref(rid) => (rid << 2) | 1,
            _ => panic!("generic instance of a non-nominal type"),
        };
        let mut blob = vec![0x15, 0x12];
        compressed(&mut blob, encoded);
        blob.extend([1, 0x1C]);
        self.type_specs.push(blob);
        self.type_specs.len() as u32
    }

    pub fn class(&mut self, namespace: &str, name: &str, base: Base) -> u32 {
        self.define(0x0010_0001, namespace, name, base, None)
    }

    pub fn class_with_flags(&mut self, flags: u32, namespace: &str, name: &str, base: Base) -> u32 {
        self.define(flags, namespace, name, base, None)
    }

    pub fn nested_class(&mut self, enclosing: u32, name: &str, base: Base) -> u32 {
        self.define(0x0010_0002, "", name, base, Some(enclosing))
    }

    fn define(&mut self, flags: u32, namespace: &str, name: &str, base: Base, enclosing: Option<u32>) -> u32 {
        self.types.push(TypeDefRow {
            flags,
            namespace: namespace.to_string(),
            name: name.to_string(),
            base,
            enclosing,
        });
        self.types.len() as u32
    }

    /// Applies `attribute_type(string, ...)` to a type with the given arguments.
    pub fn attribute(&mut self, owner: u32, attribute_type: u32, arguments: &[&str]) {
        let mut signature = vec![0x20];
        compressed(&mut signature, arguments.len() as u32);
        signature.push(0x01);
        signature.extend(std::iter::repeat(0x0E).take(arguments.len()));

        let constructor = match self
            .constructors
            .iter()
            .position(|(parent, sig)| *parent == attribute_type && *sig == signature)
        {
            Some(i) => i as u32 + 1,
            None => {
                self.constructors.push((attribute_type, signature));
                self.constructors.len() as u32
            }
        };

        let mut value = vec![0x01, 0x00];
        for argument in arguments {
            compressed(&mut value, argument.len() as u32);
            value.extend(argument.as_bytes());
        }
        value.extend([0x00, 0x00]);
        self.attributes.push(AttributeRow {
            owner,
            constructor,
            value,
        });
    }

    pub fn build(&self) -> Vec<u8> {
        let metadata = self.metadata();
        let cli_size = 72u32;
        let section_size = cli_size as usize + metadata.len();
        let raw_size = align(section_size, 0x200);
        let image_size = 0x2000 + align(section_size, 0x2000);

        let mut w = Vec::with_capacity(0x200 + raw_size);
        w.extend(b"MZ");
        pad_to(&mut w, 0x3C);
        u32le(&mut w, 0x80);
        pad_to(&mut w, 0x80);
        w.extend(b"PE\0\0");

        // COFF header: i386, one section, PE32 optional header, DLL
        u16le(&mut w, 0x014C);
        u16le(&mut w, 1);
        u32le(&mut w, 0);
        u32le(&mut w, 0);
        u32le(&mut w, 0);
        u16le(&mut w, 0xE0);
        u16le(&mut w, 0x2102);

        // Optional header, standard fields
        u16le(&mut w, 0x010B);
        w.extend([8, 0]);
        u32le(&mut w, raw_size as u32);
        u32le(&mut w, 0);
        u32le(&mut w, 0);
        u32le(&mut w, 0);
        u32le(&mut w, 0x2000);
        u32le(&mut w, 0);
        // Windows fields
        u32le(&mut w, 0x0040_0000);
        u32le(&mut w, 0x2000);
        u32le(&mut w, 0x200);
        for v in [4u16, 0, 0, 0, 4, 0] {
            u16le(&mut w, v);
        }
        u32le(&mut w, 0);
        u32le(&mut w, image_size as u32);
        u32le(&mut w, 0x200);
        u32le(&mut w, 0);
        u16le(&mut w, 3);
        u16le(&mut w, 0x8540);
        for v in [0x0010_0000u32, 0x1000, 0x0010_0000, 0x1000, 0] {
            u32le(&mut w, v);
        }
        u32le(&mut w, 16);
        for index in 0..16 {
            if index == 14 && self.managed {
                u32le(&mut w, 0x2000);
                u32le(&mut w, cli_size);
            } else {
                u32le(&mut w, 0);
                u32le(&mut w, 0);
            }
        }

        // Section table
        w.extend(b".text\0\0\0");
        u32le(&mut w, section_size as u32);
        u32le(&mut w, 0x2000);
        u32le(&mut w, raw_size as u32);
        u32le(&mut w, 0x200);
        u32le(&mut w, 0);
        u32le(&mut w, 0);
        u16le(&mut w, 0);
        u16le(&mut w, 0);
        u32le(&mut w, 0x6000_0020);
        pad_to(&mut w, 0x200);

        // CLI header, metadata right after it
        u32le(&mut w, cli_size);
        u16le(&mut w, 2);
        u16le(&mut w, 5);
        u32le(&mut w, 0x2000 + cli_size);
        u32le(&mut w, metadata.len() as u32);
        u32le(&mut w, 1);
        u32le(&mut w, 0);
        w.extend([0u8; 48]);
        w.extend(&metadata);
        pad_to(&mut w, 0x200 + raw_size);
        w
    }

    fn metadata(&self) -> Vec<u8> {
        let mut heaps = Heaps::new();
        let mut tables: Vec<(u8, u32, Vec<u8>)> = Vec::new();

        // Module
        let mut rows = Vec::new();
        u16le(&mut rows, 0);
        u16le(&mut rows, heaps.string(&format!("{}.dll", self.name)));
        u16le(&mut rows, 1);
        u16le(&mut rows, 0);
        u16le(&mut rows, 0);
        tables.push((0x00, 1, rows));

        if !self.type_refs.is_empty() {
            let mut rows = Vec::new();
            for (scope, namespace, name) in &self.type_refs {
                u16le(&mut rows, *scope as u16);
                u16le(&mut rows, heaps.string(name));
                u16le(&mut rows, heaps.string(namespace));
            }
            tables.push((0x01, self.type_refs.len() as u32, rows));
        }

        if !self.types.is_empty() {
            let mut rows = Vec::new();
            for ty in &self.types {
                u32le(&mut rows, ty.flags);
                u16le(&mut rows, heaps.string(&ty.name));
                u16le(&mut rows, heaps.string(&ty.namespace));
                let extends = match ty.base {
                    Base::None => 0,
                    Base::Def(rid) => rid << 2,
                    Base::Ref(rid) => (rid << 2) | 1,
                    Base::Spec(rid) => (rid << 2) | 2,
                };
                u16le(&mut rows, extends as u16);
                u16le(&mut rows, 1);
                u16le(&mut rows, 1);
            }
            tables.push((0x02, self.types.len() as u32, rows));
        }

        if !self.constructors.is_empty() {
            let mut rows = Vec::new();
            for (parent, signature) in &self.constructors {
                // MemberRefParent: TypeRef tag 1
                u16le(&mut rows, ((parent << 3) | 1) as u16);
                u16le(&mut rows, heaps.string(".ctor"));
                u16le(&mut rows, heaps.blob(signature));
            }
            tables.push((0x0A, self.constructors.len() as u32, rows));
        }

        if !self.attributes.is_empty() {
            let mut rows = Vec::new();
            for attribute in &self.attributes {
                // HasCustomAttribute: TypeDef tag 3; CustomAttributeType: MemberRef tag 3
                u16le(&mut rows, ((attribute.owner << 5) | 3) as u16);
                u16le(&mut rows, ((attribute.constructor << 3) | 3) as u16);
                u16le(&mut rows, heaps.blob(&attribute.value));
            }
            tables.push((0x0C, self.attributes.len() as u32, rows));
        }

        if !self.type_specs.is_empty() {
            let mut rows = Vec::new();
            for spec in &self.type_specs {
                u16le(&mut rows, heaps.blob(spec));
            }
            tables.push((0x1B, self.type_specs.len() as u32, rows));
        }

        let mut rows = Vec::new();
        u32le(&mut rows, 0x8004);
        for v in [1u16, 0, 0, 0] {
            u16le(&mut rows, v);
        }
        u32le(&mut rows, 0);
        u16le(&mut rows, 0);
        u16le(&mut rows, heaps.string(&self.name));
        u16le(&mut rows, 0);
        tables.push((0x20, 1, rows));

        if !self.references.is_empty() {
            let mut rows = Vec::new();
            for reference in &self.references {
                for v in [1u16, 0, 0, 0] {
                    u16le(&mut rows, v);
                }
                u32le(&mut rows, 0);
                u16le(&mut rows, 0);
                u16le(&mut rows, heaps.string(reference));
                u16le(&mut rows, 0);
                u16le(&mut rows, 0);
            }
            tables.push((0x23, self.references.len() as u32, rows));
        }

        let nested: Vec<(u32, u32)> = self
            .types
            .iter()
            .enumerate()
            .filter_map(|(i, ty)| ty.enclosing.map(|outer| (i as u32 + 1, outer)))
            .collect();
        if !nested.is_empty() {
            let mut rows = Vec::new();
            for (inner, outer) in &nested {
                u16le(&mut rows, *inner as u16);
                u16le(&mut rows, *outer as u16);
            }
            tables.push((0x29, nested.len() as u32, rows));
        }

        let mut table_stream = Vec::new();
        u32le(&mut table_stream, 0);
        table_stream.extend([2, 0, 0, 1]);
        let valid = tables.iter().fold(0u64, |bits, (id, _, _)| bits | (1 << id));
        table_stream.extend(valid.to_le_bytes());
        table_stream.extend(0u64.to_le_bytes());
        for (_, count, _) in &tables {
            u32le(&mut table_stream, *count);
        }
        for (_, _, rows) in &tables {
            table_stream.extend(rows);
        }
        let len = align(table_stream.len(), 4);
        pad_to(&mut table_stream, len);

        let mut guid = vec![0u8; 16];
        guid[0] = 0x4D;

        let streams: [(&str, Vec<u8>); 4] = [
            ("#~", table_stream),
            ("#Strings", heaps.strings_stream()),
            ("#GUID", guid),
            ("#Blob", heaps.blob_stream()),
        ];

        let version = b"v4.0.30319\0\0";
        let header_size = 12 + 4 + version.len() + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + align(name.len() + 1, 4))
                .sum::<usize>();

        let mut root = Vec::new();
        u32le(&mut root, 0x424A_5342);
        u16le(&mut root, 1);
        u16le(&mut root, 1);
        u32le(&mut root, 0);
        u32le(&mut root, version.len() as u32);
        root.extend(version);
        u16le(&mut root, 0);
        u16le(&mut root, streams.len() as u16);

        let mut offset = header_size;
        for (name, data) in &streams {
            u32le(&mut root, offset as u32);
            u32le(&mut root, data.len() as u32);
            root.extend(name.as_bytes());
            root.push(0);
            let len = align(root.len(), 4);
            pad_to(&mut root, len);
            offset += data.len();
        }
        for (_, data) in &streams {
            root.extend(data);
        }
        root
    }
}

struct Heaps {
    strings: Vec<u8>,
    string_index: HashMap<String, u16>,
    blobs: Vec<u8>,
}

impl Heaps {
    fn new() -> Self {
        Self {
            strings: vec![0],
            string_index: HashMap::new(),
            blobs: vec![0],
        }
    }

    fn string(&mut self, value: &str) -> u16 {
        if value.is_empty() {
            return 0;
        }
        if let Some(index) = self.string_index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u16;
        self.strings.extend(value.as_bytes());
        self.strings.push(0);
        self.string_index.insert(value.to_string(), index);
        index
    }

    fn blob(&mut self, value: &[u8]) -> u16 {
        let index = self.blobs.len() as u16;
        compressed(&mut self.blobs, value.len() as u32);
        self.blobs.extend(value);
        index
    }

    fn strings_stream(&self) -> Vec<u8> {
        let mut data = self.strings.clone();
        let len = align(data.len(), 4);
        pad_to(&mut data, len);
        data
    }

    fn blob_stream(&self) -> Vec<u8> {
        let mut data = self.blobs.clone();
        let len = align(data.len(), 4);
        pad_to(&mut data, len);
        data
    }
}

fn compressed(out: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else {
        out.extend((0xC000_0000 | value).to_be_bytes());
    }
}

fn align(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

fn pad_to(out: &mut Vec<u8>, len: usize) {
    if out.len() < len {
        out.resize(len, 0);
    }
}

fn u16le(out: &mut Vec<u8>, value: u16) {
    out.extend(value.to_le_bytes());
}

fn u32le(out: &mut Vec<u8>, value: u32) {
    out.extend(value.to_le_bytes());
}
