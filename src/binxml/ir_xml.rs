//! XML rendering over the BinXml IR.
//!
//! Streams escaped output directly into the record's output string while
//! resolving substitution placeholders against the record's binding. No
//! prologue and no indentation: output starts at the root element, and
//! `xmlns` declarations survive only on the outermost element of the
//! document.

use crate::binxml::ir::{
    BuildCtx, Element, Fragment, Node, SubstitutionArray, attr_is_omitted, element_is_omitted,
    is_xmlns_attr, parse_nested_fragments,
};
use crate::binxml::value_render::{escape_xml_into, write_xml_value};
use crate::binxml::value_variant::BinXmlValue;
use crate::err::{DeserializationError, DeserializationResult};

/// Render a record's fragments into `out`.
pub(crate) fn render_fragments_xml(
    fragments: &[Fragment<'_>],
    ctx: &BuildCtx<'_, '_>,
    out: &mut String,
) -> DeserializationResult<()> {
    for fragment in fragments {
        render_fragment(fragment, ctx, out, 0, 0)?;
    }
    Ok(())
}

fn render_fragment(
    fragment: &Fragment<'_>,
    ctx: &BuildCtx<'_, '_>,
    out: &mut String,
    depth: usize,
    nested: usize,
) -> DeserializationResult<()> {
    match fragment {
        Fragment::Element(element) => render_element(element, None, ctx, out, depth, nested),
        Fragment::Template(binding) => render_element(
            &binding.template.root,
            Some(&binding.values),
            ctx,
            out,
            depth,
            nested,
        ),
    }
}

fn render_element(
    element: &Element<'_>,
    binding: Option<&SubstitutionArray<'_>>,
    ctx: &BuildCtx<'_, '_>,
    out: &mut String,
    depth: usize,
    nested: usize,
) -> DeserializationResult<()> {
    if element_is_omitted(element, binding) {
        return Ok(());
    }

    // An array substitution as the element's sole content expands into one
    // element per entry, all sharing the element's name and attributes.
    if let [Node::Placeholder(placeholder)] = element.children.as_slice() {
        if let Some(BinXmlValue::Array { items, .. }) =
            binding.and_then(|values| values.get(placeholder.index))
        {
            for item in items {
                render_element_tag(element, binding, ctx, out, depth, nested, Some(item))?;
            }
            return Ok(());
        }
    }

    render_element_tag(element, binding, ctx, out, depth, nested, None)
}

fn render_element_tag(
    element: &Element<'_>,
    binding: Option<&SubstitutionArray<'_>>,
    ctx: &BuildCtx<'_, '_>,
    out: &mut String,
    depth: usize,
    nested: usize,
    content_override: Option<&BinXmlValue<'_>>,
) -> DeserializationResult<()> {
    out.push('<');
    out.push_str(&element.name);

    for attr in &element.attrs {
        if depth > 0 && is_xmlns_attr(&attr.name) {
            continue;
        }
        if attr_is_omitted(attr, binding) {
            continue;
        }
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        render_nodes(&attr.value, binding, ctx, out, true, depth, nested)?;
        out.push('"');
    }

    if let Some(item) = content_override {
        out.push('>');
        write_xml_value(out, item, false)?;
    } else if element.children.is_empty() {
        out.push_str("/>");
        return Ok(());
    } else {
        out.push('>');
        render_nodes(&element.children, binding, ctx, out, false, depth, nested)?;
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
    Ok(())
}

fn render_nodes(
    nodes: &[Node<'_>],
    binding: Option<&SubstitutionArray<'_>>,
    ctx: &BuildCtx<'_, '_>,
    out: &mut String,
    in_attribute: bool,
    depth: usize,
    nested: usize,
) -> DeserializationResult<()> {
    let mut idx = 0;
    while idx < nodes.len() {
        match &nodes[idx] {
            Node::PITarget(target) => {
                if in_attribute {
                    return Err(DeserializationError::BadParserState {
                        reason: "processing instruction inside an attribute value",
                    });
                }
                out.push_str("<?");
                out.push_str(target);
                if let Some(Node::PIData(data)) = nodes.get(idx + 1) {
                    out.push(' ');
                    out.push_str(data);
                    idx += 1;
                }
                out.push_str("?>");
            }
            // Data without a preceding target carries nothing renderable.
            Node::PIData(_) => {}
            node => render_node(node, binding, ctx, out, in_attribute, depth, nested)?,
        }
        idx += 1;
    }
    Ok(())
}

fn render_node(
    node: &Node<'_>,
    binding: Option<&SubstitutionArray<'_>>,
    ctx: &BuildCtx<'_, '_>,
    out: &mut String,
    in_attribute: bool,
    depth: usize,
    nested: usize,
) -> DeserializationResult<()> {
    match node {
        Node::Element(child) => {
            if in_attribute {
                return Err(DeserializationError::BadParserState {
                    reason: "element inside an attribute value",
                });
            }
            render_element(child, binding, ctx, out, depth + 1, nested)
        }
        Node::Template(template_binding) => {
            if in_attribute {
                return Err(DeserializationError::BadParserState {
                    reason: "template instance inside an attribute value",
                });
            }
            render_element(
                &template_binding.template.root,
                Some(&template_binding.values),
                ctx,
                out,
                depth + 1,
                nested,
            )
        }
        Node::Value(BinXmlValue::BinXmlFragment { raw, chunk_offset }) => {
            render_nested(ctx, *chunk_offset, raw.len(), out, in_attribute, depth, nested)
        }
        Node::Value(value) => write_xml_value(out, value, in_attribute),
        Node::Placeholder(placeholder) => {
            match binding.and_then(|values| values.get(placeholder.index)) {
                // A missing normal substitution is the empty string; a
                // missing optional substitution renders nothing. Same bytes
                // either way at this point.
                None => Ok(()),
                Some(BinXmlValue::BinXmlFragment { raw, chunk_offset }) => render_nested(
                    ctx,
                    *chunk_offset,
                    raw.len(),
                    out,
                    in_attribute,
                    depth,
                    nested,
                ),
                Some(value) => write_xml_value(out, value, in_attribute),
            }
        }
        Node::EntityRef(name) => {
            out.push('&');
            out.push_str(name);
            out.push(';');
            Ok(())
        }
        Node::CData(text) => {
            if in_attribute {
                escape_xml_into(out, text, true);
            } else {
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>");
            }
            Ok(())
        }
        // Handled by `render_nodes`.
        Node::PITarget(_) | Node::PIData(_) => Ok(()),
    }
}

fn render_nested(
    ctx: &BuildCtx<'_, '_>,
    chunk_offset: u64,
    len: usize,
    out: &mut String,
    in_attribute: bool,
    depth: usize,
    nested: usize,
) -> DeserializationResult<()> {
    if in_attribute {
        return Err(DeserializationError::BadParserState {
            reason: "binxml fragment inside an attribute value",
        });
    }
    let fragments = parse_nested_fragments(ctx, chunk_offset, len, nested)?;
    for fragment in &fragments {
        render_fragment(fragment, ctx, out, depth + 1, nested + 1)?;
    }
    Ok(())
}
