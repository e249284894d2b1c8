//! Python backend.
//!
//! Renders emission plans into per-struct `.py` modules whose encode/decode
//! procedures are byte-for-byte interoperable with every other backend.
//! Generated modules depend only on the stdlib plus `bitstruct` when the
//! struct has bitfield members.
//!
//! Package bookkeeping: one directory per dotted package level, each with an
//! `__init__.py`; the leaf `__init__.py` re-exports every generated type.
//! That file is shared mutable state across compiler invocations, so it is
//! merged with an atomic read-compute-replace (temp file + rename), never an
//! incremental append.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::backend::{Backend, PackageContext, StructArtifact};
use crate::codec;
use crate::generate::{GenerateError, GenerateErrorKind};
use crate::plan::{ArrayStep, ArrayTail, BitRun, ScalarRun, Step};
use crate::schema::{DimMode, Dimension, Member, StructDef, Typename};

pub struct PythonBackend;

impl Backend for PythonBackend {
    fn name(&self) -> &'static str {
        "python"
    }

    fn supports_little_endian(&self) -> bool {
        false
    }

    fn emit_package(&self, ctx: &PackageContext<'_>) -> Result<(), GenerateError> {
        let dirs: Vec<&str> = if ctx.package.is_empty() {
            Vec::new()
        } else {
            ctx.package.split('.').collect()
        };

        let mut package_dir = ctx.options.out_dir.clone();
        for d in &dirs {
            package_dir.push(d);
        }
        std::fs::create_dir_all(&package_dir).map_err(|err| {
            GenerateError::io(format!(
                "create package dir {}: {err}",
                package_dir.display()
            ))
        })?;

        if !dirs.is_empty() {
            let mut prefix = ctx.options.out_dir.clone();
            for (level, d) in dirs.iter().enumerate() {
                prefix.push(d);
                let init_path = prefix.join("__init__.py");
                if level + 1 == dirs.len() {
                    let exports: Vec<&str> = ctx
                        .structs
                        .iter()
                        .map(|a| a.def.name.shortname.as_str())
                        .collect();
                    merge_init_py(&init_path, &exports)?;
                } else if !init_path.exists() {
                    write_atomic(&init_path, INIT_PY_HEADER.as_bytes())?;
                }
            }
        }

        for art in &ctx.structs {
            let path = package_dir.join(format!("{}.py", art.def.name.shortname));
            if !ctx
                .gate
                .needs_generation(art.def.source_file.as_deref(), &path)
            {
                continue;
            }
            let src = render_struct(ctx, art)?;
            write_atomic(&path, src.as_bytes())?;
        }

        Ok(())
    }
}

const INIT_PY_HEADER: &str = "\"\"\"Message package __init__.py file\n\
This file automatically generated by wiregen.\n\
DO NOT MODIFY BY HAND!!!!\n\
\"\"\"\n\n";

/// Rewrite the leaf `__init__.py` with the union of its existing re-exports
/// and the freshly generated types.
fn merge_init_py(path: &Path, exports: &[&str]) -> Result<(), GenerateError> {
    let mut modules: BTreeSet<String> = exports.iter().map(|s| s.to_string()).collect();
    if path.exists() {
        let existing = std::fs::read_to_string(path)
            .map_err(|err| GenerateError::io(format!("read {}: {err}", path.display())))?;
        for line in existing.lines() {
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() >= 4 && words[0] == "from" && words[2] == "import" {
                modules.insert(words[1].trim_start_matches('.').to_string());
            }
        }
    }
    let mut out = String::from(INIT_PY_HEADER);
    for m in &modules {
        out.push_str(&format!("from .{m} import {m}\n"));
    }
    write_atomic(path, out.as_bytes())
}

fn temp_path_next_to(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), GenerateError> {
    let tmp = temp_path_next_to(path);
    std::fs::write(&tmp, contents)
        .map_err(|err| GenerateError::io(format!("write temp {}: {err}", tmp.display())))?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = std::fs::remove_file(path);
            std::fs::rename(&tmp, path)
                .map_err(|err| GenerateError::io(format!("rename {}: {err}", path.display())))
        }
    }
}

struct Py {
    out: String,
}

impl Py {
    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }
}

/// Python name a generated module uses for a compound type: the bare short
/// name for self-references, the import alias otherwise.
fn py_type_name(st: &StructDef, ty: &Typename) -> String {
    if ty.fullname == st.name.fullname {
        st.name.shortname.clone()
    } else {
        ty.name_underscored()
    }
}

/// Range expression for one dimension: a literal for const sizes, a sibling
/// field read for variable sizes.
fn len_expr(dim: &Dimension) -> String {
    match dim.mode {
        DimMode::Const => dim.size.clone(),
        DimMode::Var => format!("self.{}", dim.size),
    }
}

fn bit_format(m: &Member, for_encode: bool) -> String {
    if for_encode {
        // Values are masked before packing; the sign bit travels as an
        // ordinary bit.
        format!("u{}", m.ty.numbits)
    } else {
        codec::bitfield_format(&m.ty).unwrap_or_default()
    }
}

fn render_struct(
    ctx: &PackageContext<'_>,
    art: &StructArtifact<'_>,
) -> Result<String, GenerateError> {
    let st = art.def;
    let sn = &st.name.shortname;
    let has_bitfields = st.members.iter().any(|m| m.ty.numbits != 0);

    let mut p = Py { out: String::new() };
    p.line(0, "\"\"\"Message type definitions");
    p.line(0, "This file automatically generated by wiregen.");
    p.line(0, "DO NOT MODIFY BY HAND!!!!");
    p.line(0, "\"\"\"");
    p.blank();
    p.line(0, "try:");
    p.line(0, "    import cStringIO.StringIO as BytesIO");
    p.line(0, "except ImportError:");
    p.line(0, "    from io import BytesIO");
    p.line(0, "import struct");
    if has_bitfields {
        p.line(0, "import os, math, bitstruct");
    }
    p.blank();

    for dep in &art.plan.depends_on {
        let ty = ctx
            .schema
            .get(dep)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| Typename::parse(dep));
        if ty.package.is_empty() {
            p.line(0, &format!("from {} import {}", ty.fullname, ty.fullname));
        } else {
            p.line(
                0,
                &format!(
                    "from {} import {} as {}",
                    ty.fullname,
                    ty.shortname,
                    ty.name_underscored()
                ),
            );
        }
        p.blank();
    }

    p.line(0, &format!("class {sn}(object):"));
    let slots: Vec<String> = st.members.iter().map(|m| format!("\"{}\"", m.name)).collect();
    p.line(1, &format!("__slots__ = [{}]", slots.join(", ")));
    p.blank();

    p.line(
        1,
        &format!(
            "IS_LITTLE_ENDIAN = {};",
            if ctx.options.little_endian { "True" } else { "False" }
        ),
    );
    for c in &st.constants {
        let is_hex = c.value_str.starts_with("0x") && c.value >= 0;
        if is_hex {
            p.line(1, &format!("{} = {};", c.name, c.value_str));
        } else {
            p.line(1, &format!("{} = {};", c.name, c.value));
        }
    }
    if !st.constants.is_empty() {
        p.blank();
    }

    render_init(&mut p, st);
    render_encode(&mut p, st);
    render_encode_one(&mut p, st, art);
    render_decode(&mut p, sn);
    render_decode_one(&mut p, st, art)?;
    render_fingerprint(&mut p, st);

    Ok(p.out)
}

fn member_initializer(st: &StructDef, m: &Member, dim: usize) -> String {
    if dim == m.dims.len() {
        return match m.ty.fullname.as_str() {
            "byte" | "int8_t" | "int16_t" | "int32_t" | "int64_t" => "0".to_string(),
            "boolean" => "False".to_string(),
            "float" | "double" => "0.0".to_string(),
            "string" => "\"\"".to_string(),
            _ => format!("{}()", py_type_name(st, &m.ty)),
        };
    }
    // Byte arrays are held as buffers so the last dimension packs and
    // unpacks as one raw run.
    if dim == m.dims.len() - 1 && m.ty.fullname == "byte" {
        return "bytearray()".to_string();
    }
    match m.dims[dim].mode {
        DimMode::Var => "[]".to_string(),
        DimMode::Const => format!(
            "[ {} for dim{} in range({}) ]",
            member_initializer(st, m, dim + 1),
            dim,
            m.dims[dim].size
        ),
    }
}

fn render_init(p: &mut Py, st: &StructDef) {
    p.line(1, "def __init__(self):");
    if st.members.is_empty() {
        p.line(2, "pass");
    }
    for m in &st.members {
        p.line(
            2,
            &format!("self.{} = {}", m.name, member_initializer(st, m, 0)),
        );
    }
    p.blank();
}

fn render_encode(p: &mut Py, st: &StructDef) {
    let sn = &st.name.shortname;
    p.line(1, "def encode(self):");
    p.line(2, "buf = BytesIO()");
    p.line(2, &format!("buf.write({sn}._get_packed_fingerprint())"));
    p.line(2, "self._encode_one(buf)");
    p.line(2, "return buf.getvalue()");
    p.blank();
}

fn render_decode(p: &mut Py, sn: &str) {
    p.line(1, "def decode(data):");
    p.line(2, "if hasattr(data, 'read'):");
    p.line(3, "buf = data");
    p.line(2, "else:");
    p.line(3, "buf = BytesIO(data)");
    p.line(
        2,
        &format!("if buf.read(8) != {sn}._get_packed_fingerprint():"),
    );
    p.line(3, "raise ValueError(\"Decode error\")");
    p.line(2, &format!("return {sn}._decode_one(buf)"));
    p.line(1, "decode = staticmethod(decode)");
    p.blank();
}

fn encode_one_field(p: &mut Py, st: &StructDef, m: &Member, accessor: &str, indent: usize) {
    match m.ty.fullname.as_str() {
        "string" => {
            p.line(
                indent,
                &format!("__{}_encoded = {accessor}.encode('utf-8')", m.name),
            );
            p.line(
                indent,
                &format!(
                    "buf.write(struct.pack('>I', len(__{}_encoded)+1))",
                    m.name
                ),
            );
            p.line(indent, &format!("buf.write(__{}_encoded)", m.name));
            p.line(indent, "buf.write(b\"\\0\")");
        }
        "boolean" | "int8_t" => {
            p.line(indent, &format!("buf.write(struct.pack('b', {accessor}))"));
        }
        "byte" => {
            p.line(indent, &format!("buf.write(struct.pack('B', {accessor}))"));
        }
        _ => {
            let name = py_type_name(st, &m.ty);
            p.line(
                indent,
                &format!(
                    "assert {accessor}._get_packed_fingerprint() == {name}._get_packed_fingerprint()"
                ),
            );
            p.line(indent, &format!("{accessor}._encode_one(buf)"));
        }
    }
}

fn decode_one_field(
    p: &mut Py,
    st: &StructDef,
    m: &Member,
    accessor: &str,
    indent: usize,
    suffix: &str,
) {
    match m.ty.fullname.as_str() {
        "string" => {
            // The declared length counts the trailing NUL, so zero is
            // malformed, as is a prefix claiming more bytes than remain.
            p.line(
                indent,
                &format!("__{}_len = struct.unpack('>I', buf.read(4))[0]", m.name),
            );
            p.line(
                indent,
                &format!("__{0}_raw = buf.read(__{0}_len)", m.name),
            );
            p.line(
                indent,
                &format!("if __{0}_len == 0 or len(__{0}_raw) != __{0}_len:", m.name),
            );
            p.line(indent + 1, "raise ValueError(\"Decode error\")");
            p.line(
                indent,
                &format!(
                    "{accessor}__{}_raw[:-1].decode('utf-8', 'replace'){suffix}",
                    m.name
                ),
            );
        }
        "boolean" => {
            p.line(
                indent,
                &format!("{accessor}bool(struct.unpack('b', buf.read(1))[0]){suffix}"),
            );
        }
        _ => {
            let name = py_type_name(st, &m.ty);
            p.line(indent, &format!("{accessor}{name}._decode_one(buf){suffix}"));
        }
    }
}

fn render_packed_encode(p: &mut Py, st: &StructDef, run: &ScalarRun) {
    let fmts: String = run.formats.iter().map(|f| f.code()).collect();
    let values: Vec<String> = run
        .members
        .iter()
        .map(|&i| format!("self.{}", st.members[i].name))
        .collect();
    p.line(
        2,
        &format!("buf.write(struct.pack(\">{fmts}\", {}))", values.join(", ")),
    );
}

fn render_packed_decode(p: &mut Py, st: &StructDef, run: &ScalarRun) {
    let fmts: String = run.formats.iter().map(|f| f.code()).collect();
    let names: Vec<String> = run
        .members
        .iter()
        .map(|&i| format!("self.{}", st.members[i].name))
        .collect();
    let first = if run.members.len() == 1 { "[0]" } else { "" };
    p.line(
        2,
        &format!(
            "{} = struct.unpack(\">{fmts}\", buf.read({})){first}",
            names.join(", "),
            run.wire_bytes
        ),
    );
}

fn render_bits_encode(p: &mut Py, st: &StructDef, run: &BitRun) {
    p.line(2, &format!("numbits = offset_bit + {}", run.total_bits));
    p.line(2, "bitbuf = bytearray(math.ceil(numbits / 8))");
    p.line(2, "if (offset_bit != 0):");
    p.line(3, "buf.seek(-1, os.SEEK_CUR)");
    p.line(3, "bitbuf[0] = buf.read(1)[0]");
    p.line(3, "buf.seek(-1, os.SEEK_CUR)");
    let fmts: String = run
        .members
        .iter()
        .map(|&i| bit_format(&st.members[i], true))
        .collect();
    let values: Vec<String> = run
        .members
        .iter()
        .map(|&i| {
            let m = &st.members[i];
            format!("self.{} & ((1 << {}) - 1)", m.name, m.ty.numbits)
        })
        .collect();
    p.line(
        2,
        &format!(
            "bitstruct.pack_into(\">{fmts}\", bitbuf, offset_bit, {})",
            values.join(", ")
        ),
    );
    p.line(2, "buf.write(bitbuf)");
    if run.carry {
        p.line(2, "offset_bit = numbits % 8");
        p.blank();
    }
}

fn render_bits_decode(p: &mut Py, st: &StructDef, run: &BitRun) {
    p.line(2, &format!("numbits = {} + offset_bit", run.total_bits));
    p.line(2, "bitbuf = buf.read(math.ceil(numbits / 8))");
    let fmts: String = run
        .members
        .iter()
        .map(|&i| bit_format(&st.members[i], false))
        .collect();
    let names: Vec<String> = run
        .members
        .iter()
        .map(|&i| format!("self.{}", st.members[i].name))
        .collect();
    let first = if run.members.len() == 1 { "[0]" } else { "" };
    p.line(
        2,
        &format!(
            "{} = bitstruct.unpack_from(\">{fmts}>\", bitbuf, offset_bit){first}",
            names.join(", ")
        ),
    );
    if run.carry {
        p.line(2, "offset_bit = numbits % 8");
        p.line(2, "if (offset_bit != 0):");
        p.line(3, "buf.seek(-1, os.SEEK_CUR)");
        p.blank();
    }
}

fn render_array_encode(p: &mut Py, st: &StructDef, step: &ArrayStep) {
    let m = &st.members[step.member];
    let outer = m.dims.len() - 1;
    let mut accessor = format!("self.{}", m.name);
    for (k, dim) in m.dims[..outer].iter().enumerate() {
        accessor.push_str(&format!("[i{k}]"));
        p.line(2 + k, &format!("for i{k} in range({}):", len_expr(dim)));
    }
    let last = &m.dims[outer];
    let indent = 2 + outer;
    match &step.tail {
        ArrayTail::Bytes => {
            p.line(
                indent,
                &format!("buf.write(bytearray({accessor}[:{}]))", len_expr(last)),
            );
        }
        ArrayTail::Packed(fmt) => {
            let c = fmt.code();
            match last.mode {
                DimMode::Const => p.line(
                    indent,
                    &format!(
                        "buf.write(struct.pack('>{len}{c}', *{accessor}[:{len}]))",
                        len = last.size
                    ),
                ),
                DimMode::Var => p.line(
                    indent,
                    &format!(
                        "buf.write(struct.pack('>%d{c}' % self.{len}, *{accessor}[:self.{len}]))",
                        len = last.size
                    ),
                ),
            }
        }
        ArrayTail::Bits => {
            let nb = m.ty.numbits;
            p.line(indent, &format!("numbits = {} * {nb}", len_expr(last)));
            p.line(indent, &format!("mask = (1 << {nb}) - 1"));
            p.line(indent, "numbits += offset_bit");
            p.line(indent, "bitbuf = bytearray(math.ceil(numbits / 8))");
            p.line(indent, "if (offset_bit != 0):");
            p.line(indent + 1, "buf.seek(-1, os.SEEK_CUR)");
            p.line(indent + 1, "bitbuf[0] = buf.read(1)[0]");
            p.line(indent + 1, "buf.seek(-1, os.SEEK_CUR)");
            p.line(
                indent,
                &format!("formatstr = {} * \"u{nb}\"", len_expr(last)),
            );
            p.line(
                indent,
                &format!(
                    "bitstruct.pack_into('>' + formatstr + '>', bitbuf, offset_bit, *(f & mask for f in {accessor}[:{}]))",
                    len_expr(last)
                ),
            );
            p.line(indent, "buf.write(bitbuf)");
            p.line(indent, "offset_bit = numbits % 8");
            p.blank();
        }
        ArrayTail::Each(_) => {
            p.line(indent, &format!("for i{outer} in range({}):", len_expr(last)));
            accessor.push_str(&format!("[i{outer}]"));
            encode_one_field(p, st, m, &accessor, indent + 1);
        }
    }
}

fn render_array_decode(p: &mut Py, st: &StructDef, step: &ArrayStep) -> Result<(), GenerateError> {
    let m = &st.members[step.member];
    let outer = m.dims.len() - 1;
    let mut accessor = format!("self.{}", m.name);
    for (k, dim) in m.dims[..outer].iter().enumerate() {
        if k == 0 {
            p.line(2, &format!("{accessor} = []"));
        } else {
            p.line(2 + k, &format!("{accessor}.append([])"));
        }
        p.line(2 + k, &format!("for i{k} in range({}):", len_expr(dim)));
        if k > 0 && k < outer {
            accessor.push_str(&format!("[i{}]", k - 1));
        }
    }

    let last = &m.dims[outer];
    let indent = 2 + outer;
    match &step.tail {
        ArrayTail::Bytes => {
            let (prefix, suffix) = if outer == 0 {
                (format!("{accessor} = "), "")
            } else {
                (format!("{accessor}.append("), ")")
            };
            p.line(
                indent,
                &format!("{prefix}buf.read({}){suffix}", len_expr(last)),
            );
        }
        ArrayTail::Packed(fmt) => {
            let c = fmt.code();
            let elem_size = fmt.wire_size();
            let is_bool = m.ty.fullname == "boolean";
            let (prefix, suffix) = if outer == 0 {
                (format!("{accessor} = "), "")
            } else {
                (format!("{accessor}.append("), ")")
            };
            let unpack = match last.mode {
                DimMode::Const => {
                    let n: usize = last.size.parse().map_err(|_| {
                        GenerateError::new(
                            GenerateErrorKind::Internal,
                            format!(
                                "{}.{}: non-numeric const dimension {:?}",
                                st.name.fullname, m.name, last.size
                            ),
                        )
                    })?;
                    format!(
                        "struct.unpack('>{len}{c}', buf.read({}))",
                        n * elem_size,
                        len = last.size
                    )
                }
                DimMode::Var => {
                    if elem_size > 1 {
                        format!(
                            "struct.unpack('>%d{c}' % self.{len}, buf.read(self.{len} * {elem_size}))",
                            len = last.size
                        )
                    } else {
                        format!(
                            "struct.unpack('>%d{c}' % self.{len}, buf.read(self.{len}))",
                            len = last.size
                        )
                    }
                }
            };
            if is_bool {
                p.line(indent, &format!("{prefix}map(bool, {unpack}){suffix}"));
            } else {
                p.line(indent, &format!("{prefix}{unpack}{suffix}"));
            }
        }
        ArrayTail::Bits => {
            let nb = m.ty.numbits;
            let sign = if m.ty.sign_extend { 's' } else { 'u' };
            let (prefix, suffix) = if outer == 0 {
                (format!("{accessor} = "), "")
            } else {
                (format!("{accessor}.append("), ")")
            };
            p.line(
                indent,
                &format!("numbits = {} * {nb} + offset_bit", len_expr(last)),
            );
            p.line(indent, "bitbuf = buf.read(math.ceil(numbits / 8))");
            p.line(
                indent,
                &format!("formatstr = {} * \"{sign}{nb}\"", len_expr(last)),
            );
            p.line(
                indent,
                &format!(
                    "{prefix}[*bitstruct.unpack_from('>' + formatstr + '>', bitbuf, offset_bit)]{suffix}"
                ),
            );
            p.line(indent, "offset_bit = numbits % 8");
            p.line(indent, "if (offset_bit != 0):");
            p.line(indent + 1, "buf.seek(-1, os.SEEK_CUR)");
            p.blank();
        }
        ArrayTail::Each(_) => {
            if outer == 0 {
                p.line(2, &format!("{accessor} = []"));
            } else {
                p.line(indent, &format!("{accessor}.append([])"));
                accessor.push_str(&format!("[i{}]", outer - 1));
            }
            p.line(indent, &format!("for i{outer} in range({}):", len_expr(last)));
            accessor.push_str(".append(");
            decode_one_field(p, st, m, &accessor, indent + 1, ")");
        }
    }
    Ok(())
}

fn render_encode_one(p: &mut Py, st: &StructDef, art: &StructArtifact<'_>) {
    p.line(1, "def _encode_one(self, buf):");
    if st.members.is_empty() {
        p.line(2, "pass");
        p.blank();
        return;
    }
    let mut region = 0usize;
    for step in art.plan.encode_steps() {
        match step {
            Step::Packed(run) => render_packed_encode(p, st, run),
            Step::OpenBits => {
                p.blank();
                p.line(2, &format!("# Start of bitfield {region}"));
                p.blank();
                p.line(2, "offset_bit = 0;");
                p.blank();
            }
            Step::PackedBits(run) => {
                render_bits_encode(p, st, run);
                if !run.carry {
                    p.blank();
                    p.line(2, &format!("# End of bitfield {region}"));
                    p.blank();
                    region += 1;
                }
            }
            Step::CloseBits => {
                p.blank();
                p.line(2, &format!("# End of bitfield {region}"));
                p.blank();
                region += 1;
            }
            Step::Single(field) => {
                let m = &st.members[field.member];
                encode_one_field(p, st, m, &format!("self.{}", m.name), 2);
            }
            Step::Array(step) => render_array_encode(p, st, step),
        }
    }
    p.blank();
}

fn render_decode_one(
    p: &mut Py,
    st: &StructDef,
    art: &StructArtifact<'_>,
) -> Result<(), GenerateError> {
    let sn = &st.name.shortname;
    p.line(1, "def _decode_one(buf):");
    p.line(2, &format!("self = {sn}()"));
    let mut region = 0usize;
    for step in art.plan.decode_steps() {
        match step {
            Step::Packed(run) => render_packed_decode(p, st, run),
            Step::OpenBits => {
                p.blank();
                p.line(2, &format!("# Start of bitfield {region}"));
                p.blank();
                p.line(2, "offset_bit = 0;");
                p.blank();
            }
            Step::PackedBits(run) => {
                render_bits_decode(p, st, run);
                if !run.carry {
                    p.blank();
                    p.line(2, &format!("# End of bitfield {region}"));
                    p.blank();
                    region += 1;
                }
            }
            Step::CloseBits => {
                p.line(2, "if (offset_bit != 0):");
                p.line(3, "buf.seek(1, os.SEEK_CUR)");
                p.blank();
                p.line(2, &format!("# End of bitfield {region}"));
                p.blank();
                region += 1;
            }
            Step::Single(field) => {
                let m = &st.members[field.member];
                decode_one_field(p, st, m, &format!("self.{} = ", m.name), 2, "");
            }
            Step::Array(step) => render_array_decode(p, st, step)?,
        }
    }
    p.line(2, "return self");
    p.line(1, "_decode_one = staticmethod(_decode_one)");
    p.blank();
    Ok(())
}

fn render_fingerprint(p: &mut Py, st: &StructDef) {
    let sn = &st.name.shortname;
    let compound: Vec<&Member> = st.members.iter().filter(|m| !m.ty.is_primitive()).collect();

    p.line(1, "_hash = None");
    p.line(1, "def _get_hash_recursive(parents):");
    p.line(2, &format!("if {sn} in parents: return 0"));
    if !compound.is_empty() {
        p.line(2, &format!("newparents = parents + [{sn}]"));
    }
    let mut expr = format!("tmphash = (0x{:x}", st.base_hash);
    for m in &compound {
        expr.push_str(&format!(
            "+ {}._get_hash_recursive(newparents)",
            py_type_name(st, &m.ty)
        ));
    }
    expr.push_str(") & 0xffffffffffffffff");
    p.line(2, &expr);
    p.line(
        2,
        "tmphash  = (((tmphash<<1)&0xffffffffffffffff)  + ((tmphash>>63)&0x1)) & 0xffffffffffffffff",
    );
    p.line(2, "return tmphash");
    p.line(1, "_get_hash_recursive = staticmethod(_get_hash_recursive)");

    p.line(1, "_packed_fingerprint = None");
    p.blank();
    p.line(1, "def _get_packed_fingerprint():");
    p.line(2, &format!("if {sn}._packed_fingerprint is None:"));
    p.line(
        3,
        &format!(
            "{sn}._packed_fingerprint = struct.pack(\">Q\", {sn}._get_hash_recursive([]))"
        ),
    );
    p.line(2, &format!("return {sn}._packed_fingerprint"));
    p.line(1, "_get_packed_fingerprint = staticmethod(_get_packed_fingerprint)");
    p.blank();
}
