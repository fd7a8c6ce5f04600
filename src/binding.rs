//! Persistent scope chain mapping variable names to static types and to the
//! forms that read and write them.

use std::collections::HashMap;
use std::rc::Rc;

use ecow::EcoString;

use crate::error::UnboundVariable;
use crate::hlir::{HlirExpr, LocalSlot, Type};

/// Either the session-wide global frame or a block frame chained to its
/// parent.
///
/// Contexts are never mutated in place. `set_variable_type` returns a new
/// context; the frames are shared behind `Rc` and copied only when a
/// context that is still shared gets a new name.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingContext {
    Global {
        variables: Rc<HashMap<EcoString, Type>>,
    },
    Local {
        parent: Rc<BindingContext>,
        slots: Rc<HashMap<EcoString, LocalSlot>>,
        // Every slot this frame introduced, in declaration order. A name
        // declared twice keeps both slots.
        order: Rc<Vec<LocalSlot>>,
    },
}

impl Default for BindingContext {
    fn default() -> Self {
        BindingContext::global()
    }
}

impl BindingContext {
    pub fn global() -> Self {
        BindingContext::Global {
            variables: Rc::new(HashMap::new()),
        }
    }

    pub fn local(parent: &BindingContext) -> Self {
        BindingContext::Local {
            parent: Rc::new(parent.clone()),
            slots: Rc::new(HashMap::new()),
            order: Rc::new(Vec::new()),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, BindingContext::Global { .. })
    }

    pub fn try_get_variable_type(&self, name: &str) -> Option<Type> {
        match self {
            BindingContext::Global { variables } => variables.get(name).copied(),
            BindingContext::Local { parent, slots, .. } => match slots.get(name) {
                Some(slot) => Some(slot.ty),
                None => parent.try_get_variable_type(name),
            },
        }
    }

    pub fn get_variable_type(&self, name: &str) -> Result<Type, UnboundVariable> {
        self.try_get_variable_type(name).ok_or_else(|| UnboundVariable {
            name: name.into(),
        })
    }

    /// Binds `name` in this frame only and returns the new context.
    pub fn set_variable_type(&self, name: &str, ty: Type) -> Self {
        let mut context = self.clone();
        match &mut context {
            BindingContext::Global { variables } => {
                Rc::make_mut(variables).insert(name.into(), ty);
            }
            BindingContext::Local { slots, order, .. } => {
                let slot = LocalSlot::new(name, ty);
                Rc::make_mut(order).push(slot.clone());
                Rc::make_mut(slots).insert(name.into(), slot);
            }
        }
        context
    }

    pub fn create_get_variable_expression(&self, name: &str) -> Option<HlirExpr> {
        match self {
            BindingContext::Global { variables } => {
                variables.get(name).map(|ty| HlirExpr::GlobalGet {
                    name: name.into(),
                    ty: *ty,
                })
            }
            BindingContext::Local { parent, slots, .. } => match slots.get(name) {
                Some(slot) => Some(HlirExpr::LocalGet(slot.clone())),
                None => parent.create_get_variable_expression(name),
            },
        }
    }

    pub fn create_set_variable_expression(&self, name: &str, value: HlirExpr) -> Option<HlirExpr> {
        match self {
            BindingContext::Global { variables } => {
                variables
                    .contains_key(name)
                    .then(|| HlirExpr::GlobalSet {
                        name: name.into(),
                        value: Box::new(value),
                    })
            }
            BindingContext::Local { parent, slots, .. } => match slots.get(name) {
                Some(slot) => Some(HlirExpr::LocalSet {
                    slot: slot.clone(),
                    value: Box::new(value),
                }),
                None => parent.create_set_variable_expression(name, value),
            },
        }
    }

    /// Slots introduced directly by this frame; always empty for the global
    /// frame.
    pub fn local_variables(&self) -> &[LocalSlot] {
        match self {
            BindingContext::Global { .. } => &[],
            BindingContext::Local { order, .. } => order,
        }
    }
}
