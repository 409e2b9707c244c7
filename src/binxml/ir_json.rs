//! JSON rendering over the BinXml IR.
//!
//! Every element becomes `{ "#name": ..., "#attrs": {...}?, "#content": ? }`.
//! Text content collapses to a plain string (or a typed scalar when the
//! content is a single typed value) when the element has no element
//! children; otherwise children render as an array and loose text becomes
//! `{"#name": "#text", ...}` entries.

use crate::binxml::ir::{
    Attr, BuildCtx, Element, Fragment, Node, SubstitutionArray, attr_is_omitted,
    element_is_omitted, is_xmlns_attr, parse_nested_fragments,
};
use crate::binxml::value_render::{write_json_value, write_plain_text};
use crate::binxml::value_variant::BinXmlValue;
use crate::err::DeserializationResult;
use crate::json_writer::JsonWriter;

/// Render a record's fragments as a single JSON object (the first
/// renderable fragment roots the document).
pub(crate) fn render_fragments_json(
    fragments: &[Fragment<'_>],
    ctx: &BuildCtx<'_, '_>,
    w: &mut JsonWriter,
) -> DeserializationResult<()> {
    for fragment in fragments {
        let (element, binding) = match fragment {
            Fragment::Element(element) => (element, None),
            Fragment::Template(binding) => (&binding.template.root, Some(&binding.values)),
        };
        if element_is_omitted(element, binding) {
            continue;
        }
        return render_element(element, binding, ctx, w, 0, 0);
    }
    Ok(())
}

/// One renderable child of an element, after placeholder resolution.
enum JsonChild<'x, 'a> {
    Elem(&'x Element<'a>, Option<&'x SubstitutionArray<'a>>),
    Nested(Fragment<'a>),
    Typed(&'x BinXmlValue<'a>),
    Text(String),
}

fn render_element<'a>(
    element: &Element<'a>,
    binding: Option<&SubstitutionArray<'a>>,
    ctx: &BuildCtx<'a, '_>,
    w: &mut JsonWriter,
    depth: usize,
    nested: usize,
) -> DeserializationResult<()> {
    w.open_object();
    w.write_key("#name");
    w.write_quoted_str(&element.name);

    let kept_attrs: Vec<&Attr<'_>> = element
        .attrs
        .iter()
        .filter(|attr| !(depth > 0 && is_xmlns_attr(&attr.name)))
        .filter(|attr| !attr_is_omitted(attr, binding))
        .collect();

    if !kept_attrs.is_empty() {
        w.comma();
        w.write_key("#attrs");
        w.open_object();
        for (i, attr) in kept_attrs.iter().enumerate() {
            if i > 0 {
                w.comma();
            }
            w.write_key(&attr.name);
            render_attr_value(attr, binding, w)?;
        }
        w.close_object();
    }

    let children = collect_children(element, binding, ctx, nested)?;
    if !children.is_empty() {
        w.comma();
        w.write_key("#content");

        let has_elements = children
            .iter()
            .any(|child| matches!(child, JsonChild::Elem(..) | JsonChild::Nested(_)));

        if has_elements {
            w.open_array();
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    w.comma();
                }
                match child {
                    JsonChild::Elem(child_element, child_binding) => render_element(
                        child_element,
                        *child_binding,
                        ctx,
                        w,
                        depth + 1,
                        nested,
                    )?,
                    JsonChild::Nested(fragment) => match fragment {
                        Fragment::Element(el) => {
                            render_element(el, None, ctx, w, depth + 1, nested + 1)?
                        }
                        Fragment::Template(tb) => render_element(
                            &tb.template.root,
                            Some(&tb.values),
                            ctx,
                            w,
                            depth + 1,
                            nested + 1,
                        )?,
                    },
                    JsonChild::Typed(value) => {
                        let mut text = String::new();
                        write_plain_text(&mut text, value)?;
                        write_text_object(w, &text);
                    }
                    JsonChild::Text(text) => write_text_object(w, text),
                }
            }
            w.close_array();
        } else if let [JsonChild::Typed(value)] = children.as_slice() {
            write_json_value(w, value)?;
        } else {
            let mut text = String::new();
            for child in &children {
                match child {
                    JsonChild::Typed(value) => write_plain_text(&mut text, value)?,
                    JsonChild::Text(t) => text.push_str(t),
                    // Excluded by the `has_elements` branch above.
                    JsonChild::Elem(..) | JsonChild::Nested(_) => {}
                }
            }
            w.write_quoted_str(&text);
        }
    }

    w.close_object();
    Ok(())
}

fn write_text_object(w: &mut JsonWriter, text: &str) {
    w.open_object();
    w.write_key("#name");
    w.write_quoted_str("#text");
    w.comma();
    w.write_key("#content");
    w.write_quoted_str(text);
    w.close_object();
}

fn collect_children<'x, 'a>(
    element: &'x Element<'a>,
    binding: Option<&'x SubstitutionArray<'a>>,
    ctx: &BuildCtx<'a, '_>,
    nested: usize,
) -> DeserializationResult<Vec<JsonChild<'x, 'a>>> {
    let mut out = Vec::with_capacity(element.children.len());

    for node in &element.children {
        match node {
            Node::Element(child) => {
                if !element_is_omitted(child, binding) {
                    out.push(JsonChild::Elem(child, binding));
                }
            }
            Node::Template(tb) => {
                if !element_is_omitted(&tb.template.root, Some(&tb.values)) {
                    out.push(JsonChild::Elem(&tb.template.root, Some(&tb.values)));
                }
            }
            Node::Value(BinXmlValue::BinXmlFragment { raw, chunk_offset }) => {
                for fragment in parse_nested_fragments(ctx, *chunk_offset, raw.len(), nested)? {
                    out.push(JsonChild::Nested(fragment));
                }
            }
            Node::Value(value) => out.push(JsonChild::Typed(value)),
            Node::Placeholder(placeholder) => {
                match binding.and_then(|values| values.get(placeholder.index)) {
                    None => {
                        if !placeholder.optional {
                            out.push(JsonChild::Text(String::new()));
                        }
                    }
                    Some(BinXmlValue::Null) => {
                        if !placeholder.optional {
                            out.push(JsonChild::Text(String::new()));
                        }
                    }
                    Some(BinXmlValue::BinXmlFragment { raw, chunk_offset }) => {
                        for fragment in
                            parse_nested_fragments(ctx, *chunk_offset, raw.len(), nested)?
                        {
                            out.push(JsonChild::Nested(fragment));
                        }
                    }
                    Some(value) => out.push(JsonChild::Typed(value)),
                }
            }
            Node::EntityRef(name) => out.push(JsonChild::Text(format!("&{name};"))),
            Node::CData(text) => out.push(JsonChild::Text(text.clone())),
            Node::PITarget(_) | Node::PIData(_) => {}
        }
    }

    Ok(out)
}

fn render_attr_value(
    attr: &Attr<'_>,
    binding: Option<&SubstitutionArray<'_>>,
    w: &mut JsonWriter,
) -> DeserializationResult<()> {
    if let [node] = attr.value.as_slice() {
        match node {
            Node::Value(value) if !matches!(value, BinXmlValue::BinXmlFragment { .. }) => {
                return write_json_value(w, value);
            }
            Node::Placeholder(placeholder) => {
                return match binding.and_then(|values| values.get(placeholder.index)) {
                    None | Some(BinXmlValue::Null) => {
                        w.write_quoted_str("");
                        Ok(())
                    }
                    Some(value) if !matches!(value, BinXmlValue::BinXmlFragment { .. }) => {
                        write_json_value(w, value)
                    }
                    Some(_) => {
                        w.write_quoted_str("");
                        Ok(())
                    }
                };
            }
            _ => {}
        }
    }

    // Mixed attribute values collapse to one concatenated string.
    let mut text = String::new();
    for node in &attr.value {
        match node {
            Node::Value(value) => write_plain_text(&mut text, value)?,
            Node::Placeholder(placeholder) => {
                if let Some(value) = binding.and_then(|values| values.get(placeholder.index)) {
                    if !matches!(value, BinXmlValue::BinXmlFragment { .. }) {
                        write_plain_text(&mut text, value)?;
                    }
                }
            }
            Node::EntityRef(name) => {
                text.push('&');
                text.push_str(name);
                text.push(';');
            }
            Node::CData(t) => text.push_str(t),
            _ => {}
        }
    }
    w.write_quoted_str(&text);
    Ok(())
}
