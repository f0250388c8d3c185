//! Round-tripping a verifier frame through heap arrays
//!
//! The save direction serializes the live operand stack and local variable
//! table into `Object[]` arrays, boxing primitives on the way in; the load
//! direction is its dual, downcasting and unboxing on the way out. Which
//! boxing conversion applies is decided by the static type in the frame,
//! never by runtime inspection.

use super::Variable;
use crate::jvm::code::{Insn, InsnList, InvokeType, MethodRef, StorageKind};
use crate::jvm::{
    BaseType, BinaryName, Error, FieldType, Frame, MethodDescriptor, RefType, StaticType,
    UnqualifiedName,
};

/// Boxed counterpart of a primitive type
struct Boxed {
    class: BinaryName,
    unbox_name: UnqualifiedName,
}

fn boxed(base: BaseType) -> Boxed {
    match base {
        BaseType::Boolean => Boxed {
            class: BinaryName::BOOLEAN,
            unbox_name: UnqualifiedName::BOOLEANVALUE,
        },
        BaseType::Byte => Boxed {
            class: BinaryName::BYTE,
            unbox_name: UnqualifiedName::BYTEVALUE,
        },
        BaseType::Short => Boxed {
            class: BinaryName::SHORT,
            unbox_name: UnqualifiedName::SHORTVALUE,
        },
        BaseType::Char => Boxed {
            class: BinaryName::CHARACTER,
            unbox_name: UnqualifiedName::CHARVALUE,
        },
        BaseType::Int => Boxed {
            class: BinaryName::INTEGER,
            unbox_name: UnqualifiedName::INTVALUE,
        },
        BaseType::Float => Boxed {
            class: BinaryName::FLOAT,
            unbox_name: UnqualifiedName::FLOATVALUE,
        },
        BaseType::Long => Boxed {
            class: BinaryName::LONG,
            unbox_name: UnqualifiedName::LONGVALUE,
        },
        BaseType::Double => Boxed {
            class: BinaryName::DOUBLE,
            unbox_name: UnqualifiedName::DOUBLEVALUE,
        },
    }
}

/// `Box.valueOf(prim)`: turns the primitive on top of the stack into its box
fn box_invoke(base: BaseType) -> Insn {
    let target = boxed(base);
    Insn::Invoke(
        InvokeType::Static,
        MethodRef {
            class: target.class.clone(),
            name: UnqualifiedName::VALUEOF,
            descriptor: MethodDescriptor {
                parameters: vec![FieldType::Base(base)],
                return_type: Some(FieldType::object(target.class)),
            },
            is_static: true,
            on_interface: false,
        },
    )
}

/// `checkcast Box` + `Box.primValue()`: turns the object on top of the stack
/// back into its primitive
fn unbox_invokes(base: BaseType, out: &mut InsnList) {
    let target = boxed(base);
    out.push(Insn::CheckCast(RefType::Object(target.class.clone())));
    out.push(Insn::Invoke(
        InvokeType::Virtual,
        MethodRef {
            class: target.class,
            name: target.unbox_name,
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: Some(FieldType::Base(base)),
            },
            is_static: false,
            on_interface: false,
        },
    ));
}

fn check_array_and_temp(array_var: &Variable, temp_var: &Variable) -> Result<(), Error> {
    array_var.check_live()?;
    temp_var.check_live()?;
    if *array_var.ty() != StaticType::object_array() {
        return Err(Error::invalid_request(format!(
            "Storage array variable must be Object[], found {:?}",
            array_var.ty()
        )));
    }
    if *temp_var.ty() != StaticType::OBJECT {
        return Err(Error::invalid_request(format!(
            "Scratch variable must be Object, found {:?}",
            temp_var.ty()
        )));
    }
    if array_var.index() == temp_var.index() {
        return Err(Error::invalid_request(format!(
            "Storage and scratch variables share slot {}",
            array_var.index()
        )));
    }
    Ok(())
}

fn value_kind(ty: &StaticType, what: &str, position: usize) -> Result<StorageKind, Error> {
    StorageKind::of(ty).ok_or_else(|| {
        Error::malformed_frame(format!("{:?} value in {} at {}", ty, what, position))
    })
}

/// Generates instructions to save the operand stack to an object array
///
/// The array lands in `array_stack_var` and the operand stack is immediately
/// reloaded from it, so the frame is left exactly as it was and execution
/// can continue past the save.
pub fn save_operand_stack(
    array_stack_var: &Variable,
    temp_object_var: &Variable,
    frame: &Frame,
) -> Result<InsnList, Error> {
    check_array_and_temp(array_stack_var, temp_object_var)?;

    let mut ret = InsnList::new();

    // Create stack storage array and save it in the local variable table
    ret.push(Insn::PushInt(frame.stack_size() as i32));
    ret.push(Insn::NewRefArray(BinaryName::OBJECT));
    ret.push(Insn::Store(StorageKind::Reference, array_stack_var.index()));

    // Save the stack, top down
    for i in (0..frame.stack_size()).rev() {
        let ty = &frame.stack[i];
        value_kind(ty, "operand stack", i)?;
        if let StaticType::Base(base) = ty {
            ret.push(box_invoke(*base));
        }
        ret.push(Insn::Store(StorageKind::Reference, temp_object_var.index()));
        ret.push(Insn::Load(StorageKind::Reference, array_stack_var.index()));
        ret.push(Insn::PushInt(i as i32));
        ret.push(Insn::Load(StorageKind::Reference, temp_object_var.index()));
        ret.push(Insn::ArrayStore);
    }

    // Put the operand stack back in place
    ret.extend(load_operand_stack(array_stack_var, temp_object_var, frame)?);
    Ok(ret)
}

/// Generates instructions to load the operand stack from an object array
///
/// Reconstructs the stack bottom up, downcasting every entry and unboxing
/// the primitives.
pub fn load_operand_stack(
    array_stack_var: &Variable,
    temp_object_var: &Variable,
    frame: &Frame,
) -> Result<InsnList, Error> {
    check_array_and_temp(array_stack_var, temp_object_var)?;

    let mut ret = InsnList::new();
    for i in 0..frame.stack_size() {
        ret.push(Insn::Load(StorageKind::Reference, array_stack_var.index()));
        ret.push(Insn::PushInt(i as i32));
        ret.push(Insn::ArrayLoad);

        match &frame.stack[i] {
            StaticType::Base(base) => unbox_invokes(*base, &mut ret),
            StaticType::Ref(ref_type) => ret.push(Insn::CheckCast(ref_type.clone())),
            other => {
                return Err(Error::malformed_frame(format!(
                    "{:?} value in operand stack at {}",
                    other, i
                )))
            }
        }
    }
    Ok(ret)
}

/// Generates instructions to save the local variable table to an object
/// array
///
/// Absent slots (the high half of a wide value, or a local with no value on
/// this path) are skipped and stay `null` in the array.
pub fn save_locals(
    array_locals_var: &Variable,
    temp_object_var: &Variable,
    frame: &Frame,
) -> Result<InsnList, Error> {
    check_array_and_temp(array_locals_var, temp_object_var)?;

    let mut ret = InsnList::new();

    // Create locals storage array and save it in the local variable table
    ret.push(Insn::PushInt(frame.locals_len() as i32));
    ret.push(Insn::NewRefArray(BinaryName::OBJECT));
    ret.push(Insn::Store(StorageKind::Reference, array_locals_var.index()));

    for (i, slot) in frame.locals.iter().enumerate() {
        let ty = match slot {
            Some(ty) => ty,
            None => continue,
        };
        let kind = value_kind(ty, "local variable table", i)?;

        ret.push(Insn::Load(kind, i as u16));
        if let StaticType::Base(base) = ty {
            ret.push(box_invoke(*base));
        }
        ret.push(Insn::Store(StorageKind::Reference, temp_object_var.index()));
        ret.push(Insn::Load(StorageKind::Reference, array_locals_var.index()));
        ret.push(Insn::PushInt(i as i32));
        ret.push(Insn::Load(StorageKind::Reference, temp_object_var.index()));
        ret.push(Insn::ArrayStore);
    }

    Ok(ret)
}

/// Generates instructions to load the local variable table from an object
/// array
pub fn load_locals(
    array_locals_var: &Variable,
    temp_object_var: &Variable,
    frame: &Frame,
) -> Result<InsnList, Error> {
    check_array_and_temp(array_locals_var, temp_object_var)?;

    let mut ret = InsnList::new();
    for (i, slot) in frame.locals.iter().enumerate() {
        let ty = match slot {
            Some(ty) => ty,
            None => continue,
        };
        let kind = value_kind(ty, "local variable table", i)?;

        ret.push(Insn::Load(StorageKind::Reference, array_locals_var.index()));
        ret.push(Insn::PushInt(i as i32));
        ret.push(Insn::ArrayLoad);

        match ty {
            StaticType::Base(base) => unbox_invokes(*base, &mut ret),
            StaticType::Ref(ref_type) => ret.push(Insn::CheckCast(ref_type.clone())),
            _ => unreachable!("rejected by value_kind"),
        }
        ret.push(Insn::Store(kind, i as u16));
    }
    Ok(ret)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::instrument::VariableTable;
    use crate::jvm::{Descriptor, MethodAccessFlags, RefType};

    fn codec_vars() -> (VariableTable, Variable, Variable) {
        let mut table = VariableTable::new(
            &BinaryName::OBJECT,
            &MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::STATIC,
            4,
        );
        let array = table.acquire(StaticType::object_array()).unwrap();
        let temp = table.acquire(StaticType::OBJECT).unwrap();
        (table, array, temp)
    }

    fn invokes(fragment: &InsnList) -> Vec<&MethodRef> {
        fragment
            .iter()
            .filter_map(|insn| match insn {
                Insn::Invoke(_, method) => Some(method),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn long_local_boxes_through_long() {
        let (_table, array, temp) = codec_vars();
        let frame = Frame::new(vec![Some(StaticType::Base(BaseType::Long)), None], vec![]);
        let fragment = save_locals(&array, &temp, &frame).unwrap();

        let invokes = invokes(&fragment);
        assert_eq!(invokes.len(), 1);
        assert_eq!(invokes[0].class, BinaryName::LONG);
        assert_eq!(invokes[0].name, UnqualifiedName::VALUEOF);
        assert_eq!(invokes[0].descriptor.render(), "(J)Ljava/lang/Long;");
    }

    #[test]
    fn double_local_boxes_through_double() {
        let (_table, array, temp) = codec_vars();
        let frame = Frame::new(vec![Some(StaticType::Base(BaseType::Double)), None], vec![]);
        let fragment = save_locals(&array, &temp, &frame).unwrap();

        let invokes = invokes(&fragment);
        assert_eq!(invokes.len(), 1);
        assert_eq!(invokes[0].descriptor.render(), "(D)Ljava/lang/Double;");
    }

    #[test]
    fn empty_frame_still_allocates_arrays() {
        let (_table, array, temp) = codec_vars();
        let frame = Frame::default();

        let stack_fragment = save_operand_stack(&array, &temp, &frame).unwrap();
        assert_eq!(
            stack_fragment.as_slice(),
            &[
                Insn::PushInt(0),
                Insn::NewRefArray(BinaryName::OBJECT),
                Insn::Store(StorageKind::Reference, array.index()),
            ]
        );

        let locals_fragment = save_locals(&array, &temp, &frame).unwrap();
        assert_eq!(locals_fragment.len(), 3);
    }

    #[test]
    fn absent_locals_are_skipped() {
        let (_table, array, temp) = codec_vars();
        let frame = Frame::new(
            vec![None, Some(StaticType::Base(BaseType::Int)), None],
            vec![],
        );

        let save = save_locals(&array, &temp, &frame).unwrap();
        let touched: Vec<u16> = save
            .iter()
            .filter_map(|insn| match insn {
                Insn::Load(StorageKind::Int, idx) => Some(*idx),
                _ => None,
            })
            .collect();
        assert_eq!(touched, vec![1]);

        let load = load_locals(&array, &temp, &frame).unwrap();
        let stored: Vec<u16> = load
            .iter()
            .filter_map(|insn| match insn {
                Insn::Store(StorageKind::Int, idx) => Some(*idx),
                _ => None,
            })
            .collect();
        assert_eq!(stored, vec![1]);
    }

    #[test]
    fn reference_slots_downcast_to_their_declared_type() {
        let (_table, array, temp) = codec_vars();
        let frame = Frame::new(
            vec![],
            vec![StaticType::Ref(RefType::array(FieldType::INT))],
        );
        let fragment = load_operand_stack(&array, &temp, &frame).unwrap();
        assert!(fragment
            .iter()
            .any(|insn| *insn == Insn::CheckCast(RefType::array(FieldType::INT))));
    }

    #[test]
    fn void_on_stack_is_malformed() {
        let (_table, array, temp) = codec_vars();
        let frame = Frame::new(vec![], vec![StaticType::Void]);
        assert!(matches!(
            save_operand_stack(&array, &temp, &frame),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            load_operand_stack(&array, &temp, &frame),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn array_reused_as_scratch_is_rejected() {
        let (_table, array, _temp) = codec_vars();
        assert!(matches!(
            save_operand_stack(&array, &array, &Frame::default()),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn wrong_variable_types_are_rejected() {
        let (mut table, array, temp) = codec_vars();
        let plain = table.acquire(StaticType::OBJECT).unwrap();
        assert!(matches!(
            save_operand_stack(&plain, &temp, &Frame::default()),
            Err(Error::InvalidRequest(_))
        ));
        let _ = (array, table);
    }

    #[test]
    fn released_codec_variable_is_rejected() {
        let (mut table, array, temp) = codec_vars();
        let stale = temp.clone();
        table.release(temp).unwrap();
        assert!(matches!(
            save_locals(&array, &stale, &Frame::default()),
            Err(Error::InvalidRequest(_))
        ));
    }
}
