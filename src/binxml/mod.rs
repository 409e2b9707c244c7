pub(crate) mod ir;
pub(crate) mod ir_json;
pub(crate) mod ir_xml;
pub(crate) mod name;
pub(crate) mod tokens;
pub(crate) mod value_render;
pub(crate) mod value_variant;
