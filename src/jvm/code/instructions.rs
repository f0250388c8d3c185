//! Instruction families the instrumenter consumes and emits
//!
//! The representation is deliberately coarser than the raw opcode list:
//! per-type variants (`iload`/`lload`/..., `ireturn`/`lreturn`/...) collapse
//! into one family with a [`StorageKind`] operand, `wide` never shows up,
//! and constant pushes defer the `iconst`/`bipush`/`ldc` choice to the
//! emitter. Families the coroutine pass never has to look at or produce are
//! simply not modelled.

use super::Label;
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, RefType, StaticType, UnqualifiedName};
use std::collections::HashMap;

/// Which register/stack family a typed opcode works on
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum StorageKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl StorageKind {
    /// The family a value of the given type travels in, or `None` for the
    /// non-value tags (`void`, `method`)
    pub fn of(ty: &StaticType) -> Option<StorageKind> {
        use crate::jvm::BaseType::*;
        match ty {
            StaticType::Base(Boolean) | StaticType::Base(Byte) | StaticType::Base(Short)
            | StaticType::Base(Char) | StaticType::Base(Int) => Some(StorageKind::Int),
            StaticType::Base(Long) => Some(StorageKind::Long),
            StaticType::Base(Float) => Some(StorageKind::Float),
            StaticType::Base(Double) => Some(StorageKind::Double),
            StaticType::Ref(_) => Some(StorageKind::Reference),
            StaticType::Void | StaticType::Method(_) => None,
        }
    }
}

/// How an invocation dispatches
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum InvokeType {
    Static,
    Virtual,
    Special,
    Interface,
}

/// A method symbol an invocation refers to
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodRef {
    pub class: BinaryName,
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub is_static: bool,
    pub on_interface: bool,
}

impl MethodRef {
    /// The dispatch the `call` builder picks for this target
    pub fn invoke_type(&self) -> InvokeType {
        if self.is_static {
            InvokeType::Static
        } else if self.on_interface {
            InvokeType::Interface
        } else {
            InvokeType::Virtual
        }
    }

    /// Number of stack values the invocation consumes (receiver included)
    pub fn argument_count(&self) -> usize {
        let receiver = if self.is_static { 0 } else { 1 };
        receiver + self.descriptor.parameters.len()
    }
}

/// A constructor symbol
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ConstructorRef {
    pub class: BinaryName,
    pub parameters: Vec<FieldType>,
}

impl ConstructorRef {
    /// The `<init>` descriptor for this constructor
    pub fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            parameters: self.parameters.clone(),
            return_type: None,
        }
    }
}

/// One instruction family
#[derive(Clone, PartialEq, Debug)]
pub enum Insn {
    /// Position marker; jump, switch, and handler operands refer to these
    Label(Label),

    /// Source line marker for the instructions that follow
    Line(u32),

    /// Push an `int` constant (`iconst`/`bipush`/`sipush`/`ldc`)
    PushInt(i32),

    /// Push a `long` constant (`lconst`/`ldc2_w`)
    PushLong(i64),

    /// Push a `float` constant (`fconst`/`ldc`)
    PushFloat(f32),

    /// Push a `double` constant (`dconst`/`ldc2_w`)
    PushDouble(f64),

    /// Push a `String` constant (`ldc`)
    PushString(String),

    /// `aconst_null`
    PushNull,

    /// `pop`
    Pop,

    /// `dup`
    Dup,

    /// Typed local load (`iload`/`lload`/`fload`/`dload`/`aload`)
    Load(StorageKind, u16),

    /// Typed local store (`istore`/`lstore`/`fstore`/`dstore`/`astore`)
    Store(StorageKind, u16),

    /// `iinc`
    IInc(u16, i16),

    /// `new`
    New(BinaryName),

    /// `anewarray`
    NewRefArray(BinaryName),

    /// `aaload`
    ArrayLoad,

    /// `aastore`
    ArrayStore,

    /// `checkcast`
    CheckCast(RefType),

    /// `getstatic`
    GetStatic(BinaryName, UnqualifiedName, FieldType),

    /// `invokestatic`/`invokevirtual`/`invokespecial`/`invokeinterface`
    Invoke(InvokeType, MethodRef),

    /// `goto`
    Goto(Label),

    /// `if_icmpne`
    IfICmpNe(Label),

    /// `tableswitch` with dense cases starting at `low`
    TableSwitch {
        low: i32,
        default: Label,
        targets: Vec<Label>,
    },

    /// Typed return; `None` returns `void`
    Return(Option<StorageKind>),

    /// `athrow`
    Throw,
}

impl Insn {
    /// Is this an invocation?
    pub fn is_invoke(&self) -> bool {
        matches!(self, Insn::Invoke(_, _))
    }

    /// Clone the instruction, rewriting label operands through `label_map`
    ///
    /// Labels the map does not mention are kept as they are (the caller owns
    /// the correspondence and only maps the labels it duplicated).
    pub fn clone_with_labels(&self, label_map: &HashMap<Label, Label>) -> Insn {
        let remap = |label: &Label| *label_map.get(label).unwrap_or(label);
        match self {
            Insn::Label(label) => Insn::Label(remap(label)),
            Insn::Goto(label) => Insn::Goto(remap(label)),
            Insn::IfICmpNe(label) => Insn::IfICmpNe(remap(label)),
            Insn::TableSwitch {
                low,
                default,
                targets,
            } => Insn::TableSwitch {
                low: *low,
                default: remap(default),
                targets: targets.iter().map(|t| remap(t)).collect(),
            },
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::BaseType;

    #[test]
    fn storage_kinds() {
        assert_eq!(
            StorageKind::of(&StaticType::Base(BaseType::Boolean)),
            Some(StorageKind::Int)
        );
        assert_eq!(
            StorageKind::of(&StaticType::Base(BaseType::Long)),
            Some(StorageKind::Long)
        );
        assert_eq!(
            StorageKind::of(&StaticType::object(BinaryName::OBJECT)),
            Some(StorageKind::Reference)
        );
        assert_eq!(StorageKind::of(&StaticType::Void), None);
    }

    #[test]
    fn label_remapping() {
        let mut labels = super::super::LabelGenerator::new();
        let old = labels.fresh_label();
        let new = labels.fresh_label();
        let unrelated = labels.fresh_label();
        let map: HashMap<Label, Label> = [(old, new)].into_iter().collect();

        assert_eq!(Insn::Goto(old).clone_with_labels(&map), Insn::Goto(new));
        assert_eq!(
            Insn::Goto(unrelated).clone_with_labels(&map),
            Insn::Goto(unrelated)
        );
        let switch = Insn::TableSwitch {
            low: 0,
            default: unrelated,
            targets: vec![old, unrelated],
        };
        assert_eq!(
            switch.clone_with_labels(&map),
            Insn::TableSwitch {
                low: 0,
                default: unrelated,
                targets: vec![new, unrelated],
            }
        );
    }
}
