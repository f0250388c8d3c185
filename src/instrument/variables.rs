//! Local variable slot management for a method under instrumentation
//!
//! The table owns the method's local slot space: the argument frame and the
//! original code's locals are reserved up front, and every slot the
//! instrumentation needs is acquired above that floor and released when the
//! pass is done with it. Released indices can be reused, but the recorded
//! maximum never shrinks - the rewritten method reports the high-water mark.

use crate::jvm::{
    BinaryName, Error, MethodAccessFlags, MethodDescriptor, StaticType,
};
use std::cell::Cell;
use std::rc::Rc;

/// A slot in the local variable table
///
/// The handle stays valid until the owning [`VariableTable`] releases it;
/// loads and stores against a released slot are a programming error that the
/// fragment builders surface as [`Error::InvalidRequest`]. Cloned handles
/// share the liveness flag, so releasing through the table invalidates all
/// of them. Reacquiring an index after a release yields a new, unrelated
/// handle.
#[derive(Clone, Debug)]
pub struct Variable {
    index: u16,
    ty: StaticType,
    alive: Rc<Cell<bool>>,
}

impl Variable {
    fn new(index: u16, ty: StaticType) -> Variable {
        Variable {
            index,
            ty,
            alive: Rc::new(Cell::new(true)),
        }
    }

    /// Index of the first slot this variable occupies
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Static type of the variable
    pub fn ty(&self) -> &StaticType {
        &self.ty
    }

    /// Has the owning table released this slot?
    pub fn is_released(&self) -> bool {
        !self.alive.get()
    }

    pub(crate) fn check_live(&self) -> Result<(), Error> {
        if self.is_released() {
            Err(Error::invalid_request(format!(
                "Use of released local variable slot {}",
                self.index
            )))
        } else {
            Ok(())
        }
    }
}

/// Allocates fresh local variable slots for one method
pub struct VariableTable {
    arguments: Vec<Variable>,
    /// First index the table may hand out
    floor: u16,
    /// Occupancy of the slots above `floor`
    in_use: Vec<bool>,
    high_water: u16,
}

impl VariableTable {
    /// Set up the table for a method
    ///
    /// `reserved_locals` is the number of slots the original code uses (its
    /// `max_locals`); nothing at or below that index, nor in the argument
    /// frame, is ever handed out.
    pub fn new(
        class: &BinaryName,
        descriptor: &MethodDescriptor,
        access_flags: MethodAccessFlags,
        reserved_locals: u16,
    ) -> VariableTable {
        let mut arguments = vec![];
        let mut next_index: u16 = 0;
        if !access_flags.contains(MethodAccessFlags::STATIC) {
            arguments.push(Variable::new(0, StaticType::object(class.clone())));
            next_index = 1;
        }
        for parameter in &descriptor.parameters {
            let ty = StaticType::from(parameter.clone());
            let width = ty.width() as u16;
            arguments.push(Variable::new(next_index, ty));
            next_index += width;
        }

        let floor = next_index.max(reserved_locals);
        VariableTable {
            arguments,
            floor,
            in_use: vec![],
            high_water: floor,
        }
    }

    /// The method's argument variables, `this` included for instance methods
    pub fn arguments(&self) -> &[Variable] {
        &self.arguments
    }

    /// Acquire a fresh slot of the given type
    ///
    /// Allocation is first-fit above the floor; `long` and `double` take two
    /// contiguous indices that are never shared with another slot.
    pub fn acquire(&mut self, ty: StaticType) -> Result<Variable, Error> {
        if !ty.is_value_type() {
            return Err(Error::invalid_request(format!(
                "Cannot allocate a local variable of type {:?}",
                ty
            )));
        }
        let width = ty.width();

        let mut start = 0;
        let offset = loop {
            while self.in_use.len() < start + width {
                self.in_use.push(false);
            }
            if self.in_use[start..start + width].iter().all(|used| !used) {
                break start;
            }
            start += 1;
        };

        for slot in &mut self.in_use[offset..offset + width] {
            *slot = true;
        }
        let index = self.floor + offset as u16;
        self.high_water = self.high_water.max(index + width as u16);
        Ok(Variable::new(index, ty))
    }

    /// Release a slot acquired from this table
    ///
    /// The indices become available for reuse; the handle (and any clone of
    /// it) is dead from here on.
    pub fn release(&mut self, variable: Variable) -> Result<(), Error> {
        variable.check_live()?;
        if variable.index < self.floor {
            return Err(Error::invalid_request(format!(
                "Cannot release argument or original slot {}",
                variable.index
            )));
        }
        let offset = (variable.index - self.floor) as usize;
        for slot in &mut self.in_use[offset..offset + variable.ty.width()] {
            *slot = false;
        }
        variable.alive.set(false);
        Ok(())
    }

    /// High-water mark of the table: the `max_locals` the rewritten method
    /// must report
    pub fn max_locals(&self) -> u16 {
        self.high_water
    }
}
