use super::content::{AbilityDef, AbilityUpgrade, CardDefinition, StatGain};

/// 等级对应的累计属性加成。取配置中不超过当前等级的最高一档；
/// 没有命中任何一档时为零。用于单位实例化与展示，战斗路径
/// 只读取单位身上已物化的攻击/生命值。
pub fn stat_gains(def: &CardDefinition, level: u8) -> StatGain {
    let mut best = StatGain {
        level: 1,
        attack: 0,
        health: 0,
    };
    if let Some(leveling) = &def.leveling {
        for gain in &leveling.gains {
            if gain.level <= level && gain.level >= best.level {
                best = *gain;
            }
        }
    }
    best
}

/// 当前等级下生效的技能列表：基础技能加上所有等级不超过
/// 当前等级的里程碑增改，按里程碑等级升序应用。
pub fn active_abilities(def: &CardDefinition, level: u8) -> Vec<AbilityDef> {
    let mut abilities = def.abilities.clone();
    let Some(leveling) = &def.leveling else {
        return abilities;
    };

    let mut milestones: Vec<_> = leveling
        .milestones
        .iter()
        .filter(|milestone| milestone.level <= level)
        .collect();
    milestones.sort_by_key(|milestone| milestone.level);

    for milestone in milestones {
        match &milestone.upgrade {
            AbilityUpgrade::Add { ability } => abilities.push(ability.clone()),
            AbilityUpgrade::Replace { name, ability } => {
                if let Some(existing) = abilities.iter_mut().find(|a| a.name == *name) {
                    *existing = ability.clone();
                } else {
                    abilities.push(ability.clone());
                }
            }
        }
    }

    abilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::content::{builtin_content, ContentSource, EMBER_COLOSSUS, FLAME_ADEPT};

    #[test]
    fn level_one_keeps_base_abilities_and_stats() {
        let content = builtin_content();
        let def = content.definition(EMBER_COLOSSUS).unwrap();

        let abilities = active_abilities(def, 1);
        assert_eq!(abilities.len(), 1);
        assert_eq!(abilities[0].name, "Cinder Veil");

        let gains = stat_gains(def, 1);
        assert_eq!((gains.attack, gains.health), (0, 0));
    }

    #[test]
    fn milestones_apply_in_ascending_order() {
        let content = builtin_content();
        let def = content.definition(EMBER_COLOSSUS).unwrap();

        // 3 级：新增一条技能。
        let abilities = active_abilities(def, 3);
        assert_eq!(abilities.len(), 2);
        assert!(abilities.iter().any(|a| a.name == "Molten Core"));

        // 5 级：按名字整体替换。
        let abilities = active_abilities(def, 5);
        assert_eq!(abilities.len(), 2);
        assert!(abilities.iter().any(|a| a.name == "Inferno Veil"));
        assert!(!abilities.iter().any(|a| a.name == "Cinder Veil"));
    }

    #[test]
    fn gains_are_cumulative_totals_per_level() {
        let content = builtin_content();
        let def = content.definition(EMBER_COLOSSUS).unwrap();

        let gains = stat_gains(def, 4);
        assert_eq!((gains.attack, gains.health), (1, 2));
        let gains = stat_gains(def, 6);
        assert_eq!((gains.attack, gains.health), (3, 4));
    }

    #[test]
    fn creature_without_leveling_config_is_flat() {
        let content = builtin_content();
        let def = content.definition(FLAME_ADEPT).unwrap();
        assert!(active_abilities(def, 9).is_empty());
        let gains = stat_gains(def, 9);
        assert_eq!((gains.attack, gains.health), (0, 0));
    }
}
