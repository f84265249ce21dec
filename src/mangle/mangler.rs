//! Forward direction: descriptor tree to mangled string.

use crate::descriptor::Type;

use super::{DELIMITER, NULLABLE_SUFFIX, WILDCARD};

/// Mangle a single type descriptor. Total and deterministic.
#[must_use]
pub fn mangle(ty: &Type) -> String {
    let mut out = String::new();
    mangle_into(ty, &mut out);
    out
}

fn mangle_into(ty: &Type, out: &mut String) {
    match ty {
        Type::Builtin(tag) => out.push(tag.code()),
        Type::Reference { name, type_args } => {
            out.push('C');
            out.push(DELIMITER);
            out.push_str(name);
            out.push(DELIMITER);
            if !type_args.is_empty() {
                out.push('T');
                out.push(DELIMITER);
                for arg in type_args {
                    mangle_into(arg, out);
                }
                out.push(DELIMITER);
            }
        }
        Type::Struct { name, .. } => {
            out.push('S');
            out.push(DELIMITER);
            out.push_str(name);
            out.push(DELIMITER);
        }
        Type::Array(element) => {
            out.push('A');
            out.push(DELIMITER);
            mangle_into(element, out);
            out.push(DELIMITER);
        }
        Type::Nullable(inner) => {
            mangle_into(inner, out);
            out.push(NULLABLE_SUFFIX);
        }
        Type::Wildcard => out.push(WILDCARD),
    }
}

/// Mangle a function into its globally unique linkable name.
///
/// The result is the function name followed by five delimited segments:
/// return-plus-parameters, dispatch receiver, extension receiver, context
/// receivers and type arguments. Absent receivers leave their segment
/// empty; the delimiter is emitted regardless, so the segment count is
/// fixed and the grammar stays context-free.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn mangle_function(
    name: &str,
    ret: &Type,
    params: &[Type],
    dispatch_receiver: Option<&Type>,
    extension_receiver: Option<&Type>,
    context_receivers: &[Type],
    type_args: &[Type],
) -> String {
    let mut out = String::from(name);
    out.push(DELIMITER);
    mangle_into(ret, &mut out);
    for param in params {
        mangle_into(param, &mut out);
    }
    out.push(DELIMITER);
    if let Some(receiver) = dispatch_receiver {
        mangle_into(receiver, &mut out);
    }
    out.push(DELIMITER);
    if let Some(receiver) = extension_receiver {
        mangle_into(receiver, &mut out);
    }
    out.push(DELIMITER);
    for receiver in context_receivers {
        mangle_into(receiver, &mut out);
    }
    out.push(DELIMITER);
    for arg in type_args {
        mangle_into(arg, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BuiltinTag;

    #[test]
    fn builtins_mangle_to_single_codes() {
        assert_eq!(mangle(&Type::builtin(BuiltinTag::Int)), "i");
        assert_eq!(mangle(&Type::builtin(BuiltinTag::Void)), "v");
        assert_eq!(mangle(&Type::builtin(BuiltinTag::Address)), "a");
    }

    #[test]
    fn class_mangles_with_dotted_path() {
        let ty = Type::reference("demo.gui.Widget");
        assert_eq!(mangle(&ty), "C$demo.gui.Widget$");
    }

    #[test]
    fn class_type_arguments_use_nested_list() {
        let ty = Type::Reference {
            name: "demo.Box".into(),
            type_args: vec![Type::builtin(BuiltinTag::Int), Type::Wildcard],
        };
        assert_eq!(mangle(&ty), "C$demo.Box$T$i_$");
    }

    #[test]
    fn arrays_and_nullables_nest() {
        let ty = Type::nullable(Type::array(Type::nullable(Type::builtin(BuiltinTag::Long))));
        assert_eq!(mangle(&ty), "A$lN$N");
    }

    #[test]
    fn function_segments_are_always_five() {
        let int = Type::builtin(BuiltinTag::Int);
        let mangled = mangle_function("add", &int, &[int.clone(), int.clone()], None, None, &[], &[]);
        assert_eq!(mangled, "add$iii$$$$");
        assert_eq!(mangled.split('$').count(), 6, "name plus five segments");
    }

    #[test]
    fn receivers_fill_their_segments() {
        let int = Type::builtin(BuiltinTag::Int);
        let owner = Type::reference("demo.Calc");
        let mangled = mangle_function(
            "scale",
            &int,
            &[int.clone()],
            Some(&owner),
            None,
            &[owner.clone()],
            &[Type::Wildcard],
        );
        assert_eq!(mangled, "scale$ii$C$demo.Calc$$$C$demo.Calc$$_");
    }
}
