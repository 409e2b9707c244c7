//! BinXml IR construction.
//!
//! The token walker builds an element tree from a BinXml stream. Template
//! definitions are compiled once into owned trees whose substitution slots
//! stay as placeholder nodes carrying `{index, expected type}`; records bind
//! a per-instance substitution array and the emitters resolve placeholders
//! while walking, so instantiation never clones the tree.
//!
//! The cursor always spans the whole chunk and parsing is positioned inside
//! it, because name references, template definition offsets and substitution
//! payloads are all addressed chunk-absolutely.

use crate::binxml::name::read_name;
use crate::binxml::tokens::RawToken;
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};
use crate::err::{DeserializationError, DeserializationResult};
use crate::string_cache::StringCache;
use crate::template_cache::{CacheSession, CompiledTemplate, SlotDescriptor};
use crate::template_table::{
    TEMPLATE_DESCRIPTOR_SIZE, TemplateDefinition, TemplateTable, read_template_definition,
};
use crate::utils::ByteCursor;
use crate::utils::utf16::decode_utf16le;
use encoding::types::EncodingRef;
use log::{debug, trace};
use std::sync::Arc;

/// Recursion limit for binxml fragments embedded in substitution values.
pub(crate) const MAX_FRAGMENT_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildMode {
    Record,
    TemplateDefinition,
}

/// Everything the builder and the emitters need to interpret a record
/// against its chunk.
pub(crate) struct BuildCtx<'a, 'c> {
    pub data: &'a [u8],
    pub strings: &'c StringCache,
    pub templates: &'c TemplateTable<'a>,
    pub session: &'c CacheSession<'c>,
    pub ansi_codec: EncodingRef,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Placeholder {
    pub index: u16,
    pub value_type: BinXmlValueType,
    pub array: bool,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node<'a> {
    Element(Element<'a>),
    Value(BinXmlValue<'a>),
    EntityRef(String),
    CData(String),
    PITarget(String),
    PIData(String),
    Placeholder(Placeholder),
    Template(TemplateBinding<'a>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Attr<'a> {
    pub name: String,
    pub value: Vec<Node<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Element<'a> {
    pub name: String,
    /// Substitution index this element's presence depends on; 0xFFFF on the
    /// wire means no dependency and is stored as `None`.
    pub dependency: Option<u16>,
    pub attrs: Vec<Attr<'a>>,
    pub children: Vec<Node<'a>>,
    pub has_element_child: bool,
}

/// A top-level item of a BinXml stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fragment<'a> {
    Element(Element<'a>),
    Template(TemplateBinding<'a>),
}

/// A compiled template paired with one record's substitution values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TemplateBinding<'a> {
    pub template: Arc<CompiledTemplate>,
    pub values: SubstitutionArray<'a>,
}

/// The per-record typed value table bound to a template instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct SubstitutionArray<'a> {
    values: Vec<BinXmlValue<'a>>,
}

impl<'a> SubstitutionArray<'a> {
    pub(crate) fn get(&self, index: u16) -> Option<&BinXmlValue<'a>> {
        self.values.get(usize::from(index))
    }

    /// Out-of-range and null entries both count as missing.
    pub(crate) fn is_missing(&self, index: u16) -> bool {
        self.get(index).is_none_or(BinXmlValue::is_missing)
    }
}

impl<'a> Element<'a> {
    pub(crate) fn into_owned(self) -> Element<'static> {
        Element {
            name: self.name,
            dependency: self.dependency,
            attrs: self.attrs.into_iter().map(Attr::into_owned).collect(),
            children: self.children.into_iter().map(Node::into_owned).collect(),
            has_element_child: self.has_element_child,
        }
    }
}

impl<'a> Attr<'a> {
    fn into_owned(self) -> Attr<'static> {
        Attr {
            name: self.name,
            value: self.value.into_iter().map(Node::into_owned).collect(),
        }
    }
}

impl<'a> Node<'a> {
    fn into_owned(self) -> Node<'static> {
        match self {
            Node::Element(el) => Node::Element(el.into_owned()),
            Node::Value(v) => Node::Value(v.into_owned()),
            Node::EntityRef(s) => Node::EntityRef(s),
            Node::CData(s) => Node::CData(s),
            Node::PITarget(s) => Node::PITarget(s),
            Node::PIData(s) => Node::PIData(s),
            Node::Placeholder(p) => Node::Placeholder(p),
            Node::Template(binding) => Node::Template(TemplateBinding {
                template: binding.template,
                values: SubstitutionArray {
                    values: binding
                        .values
                        .values
                        .into_iter()
                        .map(BinXmlValue::into_owned)
                        .collect(),
                },
            }),
        }
    }
}

/// Should this element be omitted from output entirely?
///
/// Two mechanisms: the wire-level dependency identifier pointing at a missing
/// substitution, and an optional substitution that is the element's sole
/// content.
pub(crate) fn element_is_omitted(
    element: &Element<'_>,
    binding: Option<&SubstitutionArray<'_>>,
) -> bool {
    if let (Some(dependency), Some(values)) = (element.dependency, binding) {
        if values.is_missing(dependency) {
            return true;
        }
    }

    if let [Node::Placeholder(placeholder)] = element.children.as_slice() {
        if placeholder.optional
            && binding.is_none_or(|values| values.is_missing(placeholder.index))
        {
            return true;
        }
    }

    false
}

/// Should this attribute be omitted (together with its leading whitespace)?
/// True when every value node is a missing optional substitution or a null
/// literal.
pub(crate) fn attr_is_omitted(attr: &Attr<'_>, binding: Option<&SubstitutionArray<'_>>) -> bool {
    if attr.value.is_empty() {
        return true;
    }
    attr.value.iter().all(|node| match node {
        Node::Placeholder(placeholder) if placeholder.optional => {
            binding.is_none_or(|values| values.is_missing(placeholder.index))
        }
        Node::Value(value) => value.is_missing(),
        _ => false,
    })
}

/// `xmlns` declarations are emitted only on the outermost element.
pub(crate) fn is_xmlns_attr(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:")
}

struct ElementBuilder<'a> {
    name: String,
    dependency: Option<u16>,
    attrs: Vec<Attr<'a>>,
    current_attr_name: Option<String>,
    current_attr_value: Vec<Node<'a>>,
}

impl<'a> ElementBuilder<'a> {
    fn new(name: String, dependency: Option<u16>) -> Self {
        ElementBuilder {
            name,
            dependency,
            attrs: Vec::new(),
            current_attr_name: None,
            current_attr_value: Vec::new(),
        }
    }

    fn start_attribute(&mut self, name: String) {
        self.finish_attr_if_any();
        self.current_attr_name = Some(name);
    }

    fn push_attr_value(&mut self, node: Node<'a>) {
        self.current_attr_value.push(node);
    }

    fn finish_attr_if_any(&mut self) {
        if let Some(name) = self.current_attr_name.take() {
            if !self.current_attr_value.is_empty() {
                let value = std::mem::take(&mut self.current_attr_value);
                self.attrs.push(Attr { name, value });
            } else {
                self.current_attr_value.clear();
            }
        }
    }

    fn finish(mut self) -> Element<'a> {
        self.finish_attr_if_any();
        Element {
            name: self.name,
            dependency: self.dependency,
            attrs: self.attrs,
            children: Vec::new(),
            has_element_child: false,
        }
    }
}

struct TreeBuilder<'a> {
    stack: Vec<Element<'a>>,
    current: Option<ElementBuilder<'a>>,
    roots: Vec<Fragment<'a>>,
}

impl<'a> TreeBuilder<'a> {
    fn new() -> Self {
        TreeBuilder {
            stack: Vec::new(),
            current: None,
            roots: Vec::new(),
        }
    }

    fn open_element(&mut self, name: String, dependency: Option<u16>) -> DeserializationResult<()> {
        if self.current.is_some() {
            return Err(DeserializationError::BadParserState {
                reason: "open start element while another start is unfinished",
            });
        }
        self.current = Some(ElementBuilder::new(name, dependency));
        Ok(())
    }

    fn start_attribute(&mut self, name: String) -> DeserializationResult<()> {
        self.current
            .as_mut()
            .ok_or(DeserializationError::BadParserState {
                reason: "attribute outside an element start",
            })?
            .start_attribute(name);
        Ok(())
    }

    fn close_start(&mut self) -> DeserializationResult<()> {
        let element = self
            .current
            .take()
            .ok_or(DeserializationError::BadParserState {
                reason: "close start without an open element",
            })?;
        self.stack.push(element.finish());
        Ok(())
    }

    fn close_empty(&mut self) -> DeserializationResult<()> {
        let element = self
            .current
            .take()
            .ok_or(DeserializationError::BadParserState {
                reason: "close empty without an open element",
            })?;
        self.attach(element.finish());
        Ok(())
    }

    fn close_element(&mut self) -> DeserializationResult<()> {
        let element = self
            .stack
            .pop()
            .ok_or(DeserializationError::BadParserState {
                reason: "close element without a matching open",
            })?;
        self.attach(element);
        Ok(())
    }

    fn attach(&mut self, element: Element<'a>) {
        if let Some(parent) = self.stack.last_mut() {
            parent.has_element_child = true;
            parent.children.push(Node::Element(element));
        } else {
            self.roots.push(Fragment::Element(element));
        }
    }

    fn push_node(&mut self, node: Node<'a>) {
        if let Some(builder) = self.current.as_mut() {
            if builder.current_attr_name.is_some() {
                builder.push_attr_value(node);
                return;
            }
        }
        if let Some(parent) = self.stack.last_mut() {
            if matches!(node, Node::Element(_) | Node::Template(_)) {
                parent.has_element_child = true;
            }
            parent.children.push(node);
        } else if let Node::Template(binding) = node {
            self.roots.push(Fragment::Template(binding));
        } else {
            trace!("discarding stray node outside any element");
        }
    }

    fn finish(self) -> DeserializationResult<Vec<Fragment<'a>>> {
        if self.current.is_some() || !self.stack.is_empty() {
            return Err(DeserializationError::BadParserState {
                reason: "stream ended with unclosed elements",
            });
        }
        Ok(self.roots)
    }
}

/// Walk tokens from the cursor position up to `bound` (absolute), yielding
/// the stream's top-level fragments.
pub(crate) fn parse_fragments<'a>(
    cursor: &mut ByteCursor<'a>,
    bound: usize,
    ctx: &BuildCtx<'a, '_>,
    mode: BuildMode,
    depth: usize,
) -> DeserializationResult<Vec<Fragment<'a>>> {
    if depth > MAX_FRAGMENT_DEPTH {
        return Err(DeserializationError::FragmentsNestedTooDeep {
            offset: cursor.position(),
            limit: MAX_FRAGMENT_DEPTH,
        });
    }

    let bound = bound.min(ctx.data.len());
    let mut builder = TreeBuilder::new();

    while cursor.pos() < bound {
        let token_offset = cursor.position();
        let token_byte = cursor.u8("binxml token")?;
        let token =
            RawToken::from_u8(token_byte).ok_or(DeserializationError::InvalidToken {
                value: token_byte,
                offset: token_offset,
            })?;

        match token {
            RawToken::EndOfStream => {
                // Some records carry several fragments; continue only if
                // another fragment header follows immediately.
                if cursor.pos() >= bound || ctx.data.get(cursor.pos()) != Some(&0x0F) {
                    break;
                }
            }
            RawToken::FragmentHeader => {
                let major = cursor.u8("fragment header major")?;
                let minor = cursor.u8("fragment header minor")?;
                let flags = cursor.u8("fragment header flags")?;
                if (major, minor, flags) != (1, 1, 0) {
                    debug!(
                        "unexpected fragment header {major}.{minor} flags {flags} at offset {token_offset}"
                    );
                }
            }
            RawToken::OpenStartElement { has_attributes } => {
                let dependency = match cursor.u16("element dependency id")? {
                    0xFFFF => None,
                    id => Some(id),
                };
                let _data_size = cursor.u32("element data size")?;
                let name = read_name(cursor, ctx.strings)?;
                if has_attributes {
                    let _attr_list_size = cursor.u32("attribute list size")?;
                }
                builder.open_element(name, dependency)?;
            }
            RawToken::Attribute => {
                let name = read_name(cursor, ctx.strings)?;
                builder.start_attribute(name)?;
            }
            RawToken::CloseStartElement => builder.close_start()?,
            RawToken::CloseEmptyElement => builder.close_empty()?,
            RawToken::CloseElement => builder.close_element()?,
            RawToken::Value => {
                let type_byte = cursor.u8("value type")?;
                let (value_type, is_array) = BinXmlValueType::from_token_byte(type_byte).ok_or(
                    DeserializationError::InvalidValueType {
                        value: type_byte,
                        offset: cursor.position(),
                    },
                )?;
                if is_array {
                    return Err(DeserializationError::BadParserState {
                        reason: "array-typed value token in the stream",
                    });
                }
                let value = BinXmlValue::parse_stream(value_type, cursor, ctx.ansi_codec)?;
                builder.push_node(Node::Value(value));
            }
            RawToken::CDataSection => {
                let raw = cursor.len_prefixed_utf16(false, "cdata section")?;
                builder.push_node(Node::CData(decode_utf16le(raw)));
            }
            RawToken::EntityReference => {
                let name = read_name(cursor, ctx.strings)?;
                builder.push_node(Node::EntityRef(name));
            }
            RawToken::PITarget => {
                let name = read_name(cursor, ctx.strings)?;
                builder.push_node(Node::PITarget(name));
            }
            RawToken::PIData => {
                let raw = cursor.len_prefixed_utf16(false, "pi data")?;
                builder.push_node(Node::PIData(decode_utf16le(raw)));
            }
            RawToken::NormalSubstitution | RawToken::OptionalSubstitution => {
                let index = cursor.u16("substitution index")?;
                let type_byte = cursor.u8("substitution value type")?;
                let (value_type, array) = BinXmlValueType::from_token_byte(type_byte).ok_or(
                    DeserializationError::InvalidValueType {
                        value: type_byte,
                        offset: cursor.position(),
                    },
                )?;
                builder.push_node(Node::Placeholder(Placeholder {
                    index,
                    value_type,
                    array,
                    optional: token == RawToken::OptionalSubstitution,
                }));
            }
            RawToken::TemplateInstance => {
                if mode == BuildMode::TemplateDefinition {
                    return Err(DeserializationError::BadParserState {
                        reason: "template instance inside a template definition",
                    });
                }
                let binding = read_template_instance(cursor, ctx, depth)?;
                builder.push_node(Node::Template(binding));
            }
        }
    }

    builder.finish()
}

/// Read a template instance: flag byte, template id, definition offset,
/// then the substitution array. When the definition offset equals the
/// current position the definition is embedded inline and the stream
/// continues past it.
fn read_template_instance<'a>(
    cursor: &mut ByteCursor<'a>,
    ctx: &BuildCtx<'a, '_>,
    depth: usize,
) -> DeserializationResult<TemplateBinding<'a>> {
    let _flags = cursor.u8("template instance flags")?;
    let _template_id = cursor.u32("template id")?;
    let def_offset = cursor.u32("template definition offset")?;

    let template = resolve_template(cursor, ctx, def_offset, depth)?;

    let count = cursor.u32("substitution count")?;
    let remaining = ctx.data.len().saturating_sub(cursor.pos());
    let descriptors_size = (count as usize).saturating_mul(4);
    if descriptors_size > remaining {
        return Err(DeserializationError::Truncated {
            what: "substitution descriptors",
            offset: cursor.position(),
            need: descriptors_size,
            have: remaining,
        });
    }

    let mut descriptors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let size = cursor.u16("substitution size")?;
        let type_byte = cursor.u8("substitution type")?;
        let _pad = cursor.u8("substitution pad")?;
        let (value_type, is_array) = BinXmlValueType::from_token_byte(type_byte).ok_or(
            DeserializationError::InvalidValueType {
                value: type_byte,
                offset: cursor.position(),
            },
        )?;
        descriptors.push((size, value_type, is_array));
    }

    let mut values = Vec::with_capacity(count as usize);
    for (size, value_type, is_array) in descriptors {
        let offset = cursor.position();
        let payload = cursor.take_bytes(usize::from(size), "substitution payload")?;
        values.push(BinXmlValue::parse_sized(
            value_type,
            is_array,
            payload,
            offset,
            ctx.ansi_codec,
        )?);
    }

    Ok(TemplateBinding {
        template,
        values: SubstitutionArray { values },
    })
}

/// Resolve a template definition offset to a compiled template: the chunk
/// dictionary first, then a direct descriptor read (damaged pointer table),
/// with the GUID-keyed cache consulted before any compilation so templates
/// defined in earlier chunks keep working here.
fn resolve_template<'a>(
    cursor: &mut ByteCursor<'a>,
    ctx: &BuildCtx<'a, '_>,
    def_offset: u32,
    depth: usize,
) -> DeserializationResult<Arc<CompiledTemplate>> {
    if def_offset as usize == cursor.pos() {
        let definition = read_template_definition(ctx.data, def_offset)?;
        cursor.advance(
            TEMPLATE_DESCRIPTOR_SIZE + definition.data_size as usize,
            "inline template definition",
        )?;
        return ctx
            .session
            .get_or_compile(definition.guid, || compile_template(&definition, ctx, depth));
    }

    let definition = match ctx.templates.get(def_offset) {
        Some(definition) => definition.clone(),
        None => read_template_definition(ctx.data, def_offset).map_err(|e| {
            debug!("template descriptor at offset {def_offset} unreadable: {e}");
            DeserializationError::TemplateNotFound {
                offset: u64::from(def_offset),
                guid: None,
            }
        })?,
    };

    ctx.session
        .get_or_compile(definition.guid, || compile_template(&definition, ctx, depth))
}

/// Compile a template definition body into an owned tree plus its slot
/// descriptors.
pub(crate) fn compile_template(
    definition: &TemplateDefinition<'_>,
    ctx: &BuildCtx<'_, '_>,
    depth: usize,
) -> DeserializationResult<CompiledTemplate> {
    let body_start = definition.body_offset as usize;
    let mut cursor = ByteCursor::with_pos(ctx.data, body_start)?;
    let bound = body_start + definition.data_size as usize;

    let fragments = parse_fragments(
        &mut cursor,
        bound,
        ctx,
        BuildMode::TemplateDefinition,
        depth + 1,
    )?;

    let mut root: Option<Element<'_>> = None;
    for fragment in fragments {
        match fragment {
            Fragment::Element(element) => {
                if root.is_some() {
                    return Err(DeserializationError::BadParserState {
                        reason: "template definition with multiple root elements",
                    });
                }
                root = Some(element);
            }
            Fragment::Template(_) => {
                return Err(DeserializationError::BadParserState {
                    reason: "template instance inside a template definition",
                });
            }
        }
    }

    let root = root.ok_or(DeserializationError::BadParserState {
        reason: "template definition without a root element",
    })?;

    let mut slots = Vec::new();
    collect_slots(&root, &mut slots);
    slots.sort_by_key(|slot| slot.index);
    slots.dedup_by_key(|slot| slot.index);

    Ok(CompiledTemplate {
        guid: definition.guid,
        root: root.into_owned(),
        slots,
    })
}

fn collect_slots(element: &Element<'_>, out: &mut Vec<SlotDescriptor>) {
    fn push_slot(node: &Node<'_>, out: &mut Vec<SlotDescriptor>) {
        if let Node::Placeholder(placeholder) = node {
            out.push(SlotDescriptor {
                index: placeholder.index,
                value_type: placeholder.value_type,
                array: placeholder.array,
                optional: placeholder.optional,
            });
        }
    }

    for attr in &element.attrs {
        for node in &attr.value {
            push_slot(node, out);
        }
    }
    for node in &element.children {
        match node {
            Node::Element(child) => collect_slots(child, out),
            other => push_slot(other, out),
        }
    }
}

/// Parse a nested BinXml fragment carried by a substitution value. The
/// fragment is addressed chunk-absolutely so its name back-references and
/// template offsets resolve against the same chunk.
pub(crate) fn parse_nested_fragments<'a>(
    ctx: &BuildCtx<'a, '_>,
    chunk_offset: u64,
    len: usize,
    depth: usize,
) -> DeserializationResult<Vec<Fragment<'a>>> {
    let start = usize::try_from(chunk_offset).map_err(|_| DeserializationError::Truncated {
        what: "nested binxml fragment",
        offset: chunk_offset,
        need: len,
        have: 0,
    })?;
    let mut cursor = ByteCursor::with_pos(ctx.data, start)?;
    parse_fragments(&mut cursor, start + len, ctx, BuildMode::Record, depth + 1)
}
